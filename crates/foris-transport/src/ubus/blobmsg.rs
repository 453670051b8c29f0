//! blob / blobmsg attribute codec
//!
//! Every attribute starts with a big-endian `id_len` word:
//!
//! ```text
//! bit 31      extended (blobmsg) flag
//! bits 24..30 attribute id (blobmsg: value type)
//! bits 0..23  length including the 4-byte header
//! ```
//!
//! followed by the payload, zero-padded to a 4-byte boundary. A blobmsg
//! payload starts with a name header (`u16` name length, name, NUL, padded)
//! before the value.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Number, Value};

use crate::error::{Result, TransportError};

pub const BLOB_ATTR_EXTENDED: u32 = 0x8000_0000;
pub const BLOB_ATTR_ID_MASK: u32 = 0x7f00_0000;
pub const BLOB_ATTR_ID_SHIFT: u32 = 24;
pub const BLOB_ATTR_LEN_MASK: u32 = 0x00ff_ffff;
pub const BLOB_ATTR_ALIGN: usize = 4;
const BLOB_HEADER_LEN: usize = 4;

/// blobmsg value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlobmsgType {
    Unspec = 0,
    Array = 1,
    Table = 2,
    String = 3,
    Int64 = 4,
    Int32 = 5,
    Int16 = 6,
    Bool = 7,
    Double = 8,
}

impl BlobmsgType {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => BlobmsgType::Unspec,
            1 => BlobmsgType::Array,
            2 => BlobmsgType::Table,
            3 => BlobmsgType::String,
            4 => BlobmsgType::Int64,
            5 => BlobmsgType::Int32,
            6 => BlobmsgType::Int16,
            7 => BlobmsgType::Bool,
            8 => BlobmsgType::Double,
            _ => return None,
        })
    }
}

pub fn align(len: usize) -> usize {
    (len + BLOB_ATTR_ALIGN - 1) & !(BLOB_ATTR_ALIGN - 1)
}

/// A decoded attribute borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAttr<'a> {
    pub id: u8,
    pub extended: bool,
    pub payload: &'a [u8],
}

/// Append an attribute
pub fn put_attr(buf: &mut BytesMut, id: u8, extended: bool, payload: &[u8]) {
    let len = BLOB_HEADER_LEN + payload.len();
    let mut id_len = ((id as u32) << BLOB_ATTR_ID_SHIFT) & BLOB_ATTR_ID_MASK;
    id_len |= len as u32 & BLOB_ATTR_LEN_MASK;
    if extended {
        id_len |= BLOB_ATTR_EXTENDED;
    }
    buf.put_u32(id_len);
    buf.extend_from_slice(payload);
    buf.put_bytes(0, align(len) - len);
}

/// Split a buffer into consecutive attributes
pub fn parse_attrs(mut buf: &[u8]) -> Result<Vec<BlobAttr<'_>>> {
    let mut attrs = Vec::new();
    while !buf.is_empty() {
        if buf.len() < BLOB_HEADER_LEN {
            return Err(TransportError::Protocol("truncated blob header".into()));
        }
        let id_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = (id_len & BLOB_ATTR_LEN_MASK) as usize;
        if len < BLOB_HEADER_LEN || len > buf.len() {
            return Err(TransportError::Protocol(format!("bad blob length {}", len)));
        }

        attrs.push(BlobAttr {
            id: ((id_len & BLOB_ATTR_ID_MASK) >> BLOB_ATTR_ID_SHIFT) as u8,
            extended: id_len & BLOB_ATTR_EXTENDED != 0,
            payload: &buf[BLOB_HEADER_LEN..len],
        });

        let padded = align(len).min(buf.len());
        buf = &buf[padded..];
    }
    Ok(attrs)
}

fn put_blobmsg(buf: &mut BytesMut, kind: BlobmsgType, name: &str, data: &[u8]) {
    let hdr_len = align(2 + name.len() + 1);
    let mut payload = BytesMut::with_capacity(hdr_len + data.len());
    payload.put_u16(name.len() as u16);
    payload.extend_from_slice(name.as_bytes());
    payload.put_bytes(0, hdr_len - 2 - name.len());
    payload.extend_from_slice(data);
    put_attr(buf, kind as u8, true, &payload);
}

/// Append one named value; `null` is skipped
pub fn put_value(buf: &mut BytesMut, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => put_blobmsg(buf, BlobmsgType::Bool, name, &[*b as u8]),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if let Ok(small) = i32::try_from(i) {
                    put_blobmsg(buf, BlobmsgType::Int32, name, &small.to_be_bytes());
                } else {
                    put_blobmsg(buf, BlobmsgType::Int64, name, &i.to_be_bytes());
                }
            } else if let Some(f) = n.as_f64() {
                put_blobmsg(buf, BlobmsgType::Double, name, &f.to_bits().to_be_bytes());
            } else {
                return Err(TransportError::Protocol(format!("unsupported number {}", n)));
            }
        }
        Value::String(s) => {
            let mut data = Vec::with_capacity(s.len() + 1);
            data.extend_from_slice(s.as_bytes());
            data.push(0);
            put_blobmsg(buf, BlobmsgType::String, name, &data);
        }
        Value::Array(items) => {
            let mut inner = BytesMut::new();
            for item in items {
                put_value(&mut inner, "", item)?;
            }
            put_blobmsg(buf, BlobmsgType::Array, name, &inner);
        }
        Value::Object(map) => {
            let inner = encode_table(map)?;
            put_blobmsg(buf, BlobmsgType::Table, name, &inner);
        }
    }
    Ok(())
}

/// Encode the members of a table (without an enclosing attribute)
pub fn encode_table(map: &Map<String, Value>) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    for (name, value) in map {
        put_value(&mut buf, name, value)?;
    }
    Ok(buf.freeze())
}

fn split_blobmsg<'a>(attr: &BlobAttr<'a>) -> Result<(String, BlobmsgType, &'a [u8])> {
    let p = attr.payload;
    if !attr.extended || p.len() < 2 {
        return Err(TransportError::Protocol("not a blobmsg attribute".into()));
    }
    let name_len = u16::from_be_bytes([p[0], p[1]]) as usize;
    let hdr_len = align(2 + name_len + 1);
    if p.len() < hdr_len {
        return Err(TransportError::Protocol("truncated blobmsg name".into()));
    }
    let name = String::from_utf8_lossy(&p[2..2 + name_len]).into_owned();
    let kind = BlobmsgType::from_id(attr.id)
        .ok_or_else(|| TransportError::Protocol(format!("unknown blobmsg type {}", attr.id)))?;
    Ok((name, kind, &p[hdr_len..]))
}

fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| TransportError::Protocol("truncated blobmsg value".into()))
}

fn decode_value(kind: BlobmsgType, data: &[u8]) -> Result<Value> {
    Ok(match kind {
        BlobmsgType::Unspec => Value::Null,
        BlobmsgType::Bool => Value::Bool(fixed::<1>(data)?[0] != 0),
        BlobmsgType::Int16 => Value::from(i16::from_be_bytes(fixed::<2>(data)?)),
        BlobmsgType::Int32 => Value::from(i32::from_be_bytes(fixed::<4>(data)?)),
        BlobmsgType::Int64 => Value::from(i64::from_be_bytes(fixed::<8>(data)?)),
        BlobmsgType::Double => {
            let f = f64::from_bits(u64::from_be_bytes(fixed::<8>(data)?));
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        BlobmsgType::String => {
            let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
            Value::String(String::from_utf8_lossy(&data[..end]).into_owned())
        }
        BlobmsgType::Array => Value::Array(decode_array(data)?),
        BlobmsgType::Table => Value::Object(decode_table(data)?),
    })
}

/// Decode the members of a table
pub fn decode_table(buf: &[u8]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for attr in parse_attrs(buf)? {
        let (name, kind, data) = split_blobmsg(&attr)?;
        map.insert(name, decode_value(kind, data)?);
    }
    Ok(map)
}

/// Decode the elements of an array
pub fn decode_array(buf: &[u8]) -> Result<Vec<Value>> {
    parse_attrs(buf)?
        .iter()
        .map(|attr| {
            let (_, kind, data) = split_blobmsg(attr)?;
            decode_value(kind, data)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int32_wire_layout() {
        let map = json!({"a": 1});
        let encoded = encode_table(map.as_object().unwrap()).unwrap();
        assert_eq!(
            &encoded[..],
            &[0x85, 0x00, 0x00, 0x0c, 0x00, 0x01, b'a', 0x00, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn test_string_padding() {
        let map = json!({"id": "abcde"});
        let encoded = encode_table(map.as_object().unwrap()).unwrap();
        // 4 header + 8 name header + 6 string bytes = 18, padded to 20
        assert_eq!(encoded.len(), 20);
        assert_eq!(&encoded[..4], &[0x83, 0x00, 0x00, 18]);
    }

    #[test]
    fn test_nested_table() {
        let value = json!({
            "action": "update_settings",
            "data": {
                "mode": "managed",
                "dhcp": {"enabled": true, "start": 10, "lease_time": 86401},
                "big": 5_000_000_000i64,
                "ratio": 0.5,
                "ports": [1, "two", false],
                "skipped": null
            }
        });
        let encoded = encode_table(value.as_object().unwrap()).unwrap();
        let decoded = Value::Object(decode_table(&encoded).unwrap());

        let mut expected = value.clone();
        expected["data"].as_object_mut().unwrap().remove("skipped");
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_truncated_input() {
        assert!(decode_table(&[0x85, 0x00, 0x00, 0x0c, 0x00]).is_err());
        assert!(parse_attrs(&[0x00, 0x00]).is_err());
    }
}
