//! Length-prefixed frame encoding/decoding
//!
//! Stream transports carry one JSON document per frame:
//!
//! ```text
//! ┌──────────────────────────────┬───────────────────────────────┐
//! │ Length (u32 little-endian)   │ UTF-8 JSON (length bytes)     │
//! └──────────────────────────────┴───────────────────────────────┘
//! ```

use crate::{Error, Message, Result, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

/// Prefix a payload with its length
pub fn frame_payload(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Encode a message as a frame
pub fn encode_frame(message: &Message) -> Result<Bytes> {
    Ok(frame_payload(&message.to_bytes()?))
}

/// Encode an arbitrary JSON value as a frame
pub fn encode_value(value: &Value) -> Result<Bytes> {
    let payload = serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(frame_payload(&payload))
}

/// Decode one frame from the start of `buf`.
///
/// Returns the payload and the number of bytes consumed, or `None` when the
/// buffer does not yet hold a complete frame.
pub fn decode_frame(buf: &[u8], max_size: usize) -> Result<Option<(Bytes, usize)>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = (&buf[..LENGTH_PREFIX_SIZE]).get_u32_le() as usize;
    if len > max_size {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let total = LENGTH_PREFIX_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((
        Bytes::copy_from_slice(&buf[LENGTH_PREFIX_SIZE..total]),
        total,
    )))
}

/// Incremental frame decoder for byte streams
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8192),
            max_size,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete frame payload, if any
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = (&self.buf[..LENGTH_PREFIX_SIZE]).get_u32_le() as usize;
        if len > self.max_size {
            return Err(Error::FrameTooLarge {
                size: len,
                max: self.max_size,
            });
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes buffered but not yet returned as frames
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
