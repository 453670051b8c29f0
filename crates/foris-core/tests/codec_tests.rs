//! Frame codec tests

use foris_core::codec::{decode_frame, encode_frame, encode_value, FrameDecoder};
use foris_core::{Error, Message, DEFAULT_MAX_FRAME_SIZE};
use serde_json::json;

#[test]
fn test_frame_layout() {
    let frame = encode_frame(&Message::request("lan", "get_settings", None)).unwrap();
    let payload = br#"{"module":"lan","kind":"request","action":"get_settings"}"#;
    assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
    assert_eq!(&frame[4..], payload);
}

#[test]
fn test_decode_partial() {
    let frame = encode_value(&json!({"a": 1})).unwrap();
    assert!(decode_frame(&frame[..3], DEFAULT_MAX_FRAME_SIZE).unwrap().is_none());
    assert!(decode_frame(&frame[..frame.len() - 1], DEFAULT_MAX_FRAME_SIZE)
        .unwrap()
        .is_none());

    let (payload, used) = decode_frame(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
    assert_eq!(used, frame.len());
    assert_eq!(&payload[..], br#"{"a":1}"#);
}

#[test]
fn test_decoder_split_and_coalesced() {
    let first = encode_frame(&Message::request("lan", "get_settings", None)).unwrap();
    let second = encode_frame(&Message::notification("lan", "update_settings", Some(json!({"mode": "managed"})))).unwrap();

    let mut stream = first.to_vec();
    stream.extend_from_slice(&second);

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    for chunk in stream.chunks(5) {
        decoder.push(chunk);
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(Message::from_slice(&frame).unwrap());
        }
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].action, "get_settings");
    assert_eq!(frames[1].data, Some(json!({"mode": "managed"})));
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_oversize_frame() {
    let mut decoder = FrameDecoder::with_max_size(8);
    decoder.push(&100u32.to_le_bytes());
    assert!(matches!(
        decoder.next_frame(),
        Err(Error::FrameTooLarge { size: 100, max: 8 })
    ));
}

#[test]
fn test_identical_messages_identical_bytes() {
    let data = json!({"b": 1, "a": {"y": true, "x": [1, 2]}});
    let one = encode_frame(&Message::notification("lan", "update_settings", Some(data.clone()))).unwrap();
    let two = encode_frame(&Message::notification("lan", "update_settings", Some(data))).unwrap();
    assert_eq!(one, two);
}
