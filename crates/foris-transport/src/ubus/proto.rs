//! ubus message framing
//!
//! A message is an 8-byte header (`version`, `type`, big-endian `seq` and
//! `peer`) followed by one blob attribute (id 0) whose payload holds the
//! message attributes.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::blobmsg::{self, BlobmsgType, BLOB_ATTR_LEN_MASK};
use crate::error::{Result, TransportError};

pub const UBUS_MSG_VERSION: u8 = 0;
pub const UBUS_MAX_MSGLEN: usize = 1024 * 1024;
const HEADER_LEN: usize = 8;

/// Object id of the ubus event dispatcher
pub const UBUS_SYSTEM_OBJECT_EVENT: u32 = 1;

pub mod msg {
    pub const HELLO: u8 = 0;
    pub const STATUS: u8 = 1;
    pub const DATA: u8 = 2;
    pub const PING: u8 = 3;
    pub const LOOKUP: u8 = 4;
    pub const INVOKE: u8 = 5;
    pub const ADD_OBJECT: u8 = 6;
    pub const REMOVE_OBJECT: u8 = 7;
    pub const SUBSCRIBE: u8 = 8;
    pub const UNSUBSCRIBE: u8 = 9;
    pub const NOTIFY: u8 = 10;
}

pub mod attr {
    pub const STATUS: u8 = 1;
    pub const OBJPATH: u8 = 2;
    pub const OBJID: u8 = 3;
    pub const METHOD: u8 = 4;
    pub const OBJTYPE: u8 = 5;
    pub const SIGNATURE: u8 = 6;
    pub const DATA: u8 = 7;
    pub const TARGET: u8 = 8;
    pub const ACTIVE: u8 = 9;
    pub const NO_REPLY: u8 = 10;
}

/// ubus status codes
pub mod status {
    pub const OK: u32 = 0;
    pub const INVALID_COMMAND: u32 = 1;
    pub const INVALID_ARGUMENT: u32 = 2;
    pub const METHOD_NOT_FOUND: u32 = 3;
    pub const NOT_FOUND: u32 = 4;
    pub const NO_DATA: u32 = 5;
    pub const PERMISSION_DENIED: u32 = 6;
    pub const TIMEOUT: u32 = 7;
    pub const NOT_SUPPORTED: u32 = 8;
    pub const UNKNOWN_ERROR: u32 = 9;
    pub const CONNECTION_FAILED: u32 = 10;
}

#[derive(Debug, Clone, PartialEq)]
pub struct UbusMessage {
    pub msg_type: u8,
    pub seq: u16,
    pub peer: u32,
    attrs: Vec<(u8, Bytes)>,
}

impl UbusMessage {
    pub fn new(msg_type: u8, seq: u16, peer: u32) -> Self {
        Self {
            msg_type,
            seq,
            peer,
            attrs: Vec::new(),
        }
    }

    pub fn with_u32(mut self, id: u8, value: u32) -> Self {
        self.attrs
            .push((id, Bytes::copy_from_slice(&value.to_be_bytes())));
        self
    }

    pub fn with_u8(mut self, id: u8, value: u8) -> Self {
        self.attrs.push((id, Bytes::copy_from_slice(&[value])));
        self
    }

    pub fn with_string(mut self, id: u8, value: &str) -> Self {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        self.attrs.push((id, Bytes::from(data)));
        self
    }

    /// Attribute holding the members of a blobmsg table
    pub fn with_table(mut self, id: u8, table: &Map<String, Value>) -> Result<Self> {
        self.attrs.push((id, blobmsg::encode_table(table)?));
        Ok(self)
    }

    /// Method signature: one table per method naming its arguments
    pub fn with_signature(mut self, methods: &[(String, Vec<(String, BlobmsgType)>)]) -> Self {
        let mut sig = BytesMut::new();
        for (method, args) in methods {
            let mut policy = Map::new();
            for (arg, kind) in args {
                policy.insert(arg.clone(), Value::from(*kind as u32));
            }
            if let Err(e) = blobmsg::put_value(&mut sig, method, &Value::Object(policy)) {
                tracing::warn!("Skipping signature of {}: {}", method, e);
            }
        }
        self.attrs.push((attr::SIGNATURE, sig.freeze()));
        self
    }

    fn get(&self, id: u8) -> Option<&Bytes> {
        self.attrs.iter().find(|(a, _)| *a == id).map(|(_, v)| v)
    }

    pub fn has(&self, id: u8) -> bool {
        self.get(id).is_some()
    }

    pub fn get_u32(&self, id: u8) -> Option<u32> {
        let v = self.get(id)?;
        Some(u32::from_be_bytes(v.get(..4)?.try_into().ok()?))
    }

    pub fn get_u8(&self, id: u8) -> Option<u8> {
        self.get(id)?.first().copied()
    }

    pub fn get_string(&self, id: u8) -> Option<String> {
        let v = self.get(id)?;
        let end = v.iter().position(|b| *b == 0).unwrap_or(v.len());
        Some(String::from_utf8_lossy(&v[..end]).into_owned())
    }

    pub fn get_table(&self, id: u8) -> Result<Option<Map<String, Value>>> {
        self.get(id).map(|v| blobmsg::decode_table(v)).transpose()
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        for (id, payload) in &self.attrs {
            blobmsg::put_attr(&mut body, *id, false, payload);
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 + body.len());
        buf.put_u8(UBUS_MSG_VERSION);
        buf.put_u8(self.msg_type);
        buf.put_u16(self.seq);
        buf.put_u32(self.peer);
        blobmsg::put_attr(&mut buf, 0, false, &body);
        buf.freeze()
    }

    /// Decode a header and the enclosing blob (header included)
    pub fn decode(header: &[u8; HEADER_LEN], blob: &[u8]) -> Result<Self> {
        let mut message = Self::new(
            header[1],
            u16::from_be_bytes([header[2], header[3]]),
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        );

        let outer = blobmsg::parse_attrs(blob)?;
        let body = outer
            .first()
            .ok_or_else(|| TransportError::Protocol("empty ubus message".into()))?;
        for a in blobmsg::parse_attrs(body.payload)? {
            message.attrs.push((a.id, Bytes::copy_from_slice(a.payload)));
        }
        Ok(message)
    }
}

/// Read one message; `None` on a clean end of stream
pub async fn read_message<R>(reader: &mut R) -> Result<Option<UbusMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut blob_header = [0u8; 4];
    reader.read_exact(&mut blob_header).await?;
    let len = (u32::from_be_bytes(blob_header) & BLOB_ATTR_LEN_MASK) as usize;
    if !(4..=UBUS_MAX_MSGLEN).contains(&len) {
        return Err(TransportError::Protocol(format!("bad ubus message length {}", len)));
    }

    let mut blob = vec![0u8; len];
    blob[..4].copy_from_slice(&blob_header);
    reader.read_exact(&mut blob[4..]).await?;

    UbusMessage::decode(&header, &blob).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_layout() {
        let encoded = UbusMessage::new(msg::LOOKUP, 0x0102, 0x0a0b0c0d)
            .with_string(attr::OBJPATH, "x")
            .encode();

        assert_eq!(&encoded[..8], &[0, 4, 0x01, 0x02, 0x0a, 0x0b, 0x0c, 0x0d]);
        // outer blob: 4 + inner attr (4 + "x\0" padded to 8)
        assert_eq!(&encoded[8..12], &[0x00, 0x00, 0x00, 0x0c]);
        assert_eq!(&encoded[12..16], &[0x02, 0x00, 0x00, 0x06]);
        assert_eq!(encoded.len(), 20);
    }

    #[tokio::test]
    async fn test_read_back() {
        let data = json!({"data": {"mode": "managed"}});
        let original = UbusMessage::new(msg::INVOKE, 7, 42)
            .with_u32(attr::OBJID, 0x1234)
            .with_string(attr::METHOD, "get_settings")
            .with_table(attr::DATA, data.as_object().unwrap())
            .unwrap();

        let encoded = original.encode();
        let mut reader = &encoded[..];
        let decoded = read_message(&mut reader).await.unwrap().unwrap();

        assert_eq!(decoded.msg_type, msg::INVOKE);
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.peer, 42);
        assert_eq!(decoded.get_u32(attr::OBJID), Some(0x1234));
        assert_eq!(decoded.get_string(attr::METHOD).as_deref(), Some("get_settings"));
        assert_eq!(decoded.get_table(attr::DATA).unwrap(), data.as_object().cloned());
        assert!(!decoded.has(attr::NO_REPLY));

        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn test_signature() {
        let message = UbusMessage::new(msg::ADD_OBJECT, 1, 0).with_signature(&[(
            "get_settings".to_string(),
            vec![("data".to_string(), BlobmsgType::Table)],
        )]);
        let sig = message.get_table(attr::SIGNATURE).unwrap().unwrap();
        assert_eq!(Value::Object(sig), json!({"get_settings": {"data": 2}}));
    }
}
