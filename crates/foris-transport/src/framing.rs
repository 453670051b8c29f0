//! Length-prefixed frames over async byte streams

use bytes::{Bytes, BytesMut};
use foris_core::{codec, FrameDecoder, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

const READ_BUFFER_SIZE: usize = 8192;

/// A stream carrying one JSON document per frame
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    decoder: FrameDecoder,
    read_buf: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_decoder(stream, FrameDecoder::new())
    }

    pub fn with_decoder(stream: S, decoder: FrameDecoder) -> Self {
        Self {
            stream,
            decoder,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read the next frame payload; `None` once the peer has closed.
    ///
    /// A partial frame at end of stream is discarded.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            self.read_buf.clear();
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.push(&self.read_buf[..n]);
        }
    }

    pub async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.write_all(&codec::frame_payload(payload)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_payload(&message.to_bytes()?).await
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FramedStream::new(a);
        let mut reader = FramedStream::new(b);

        let message = Message::request("lan", "get_settings", None);
        let big = Message::request("lan", "update_settings", Some(json!({"blob": "x".repeat(500)})));

        let write = tokio::spawn(async move {
            writer.write_message(&message).await.unwrap();
            writer.write_message(&big).await.unwrap();
            writer
        });

        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(
            Message::from_slice(&first).unwrap(),
            Message::request("lan", "get_settings", None)
        );
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(Message::from_slice(&second).unwrap().action, "update_settings");

        drop(write.await.unwrap());
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversize_frame_is_error() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FramedStream::with_decoder(b, FrameDecoder::with_max_size(8));

        a.write_all(&codec::frame_payload(b"0123456789")).await.unwrap();
        assert!(reader.read_frame().await.is_err());
    }
}
