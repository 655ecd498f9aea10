//! Binary frame codec.
//!
//! Frame layout: `[u32 total length][u8 packet type][payload]`, where the
//! payload is UTF-8 JSON or a single zero byte for "no body". The length is
//! written little-endian. On receipt the first four bytes are reversed and
//! read big-endian, which the existing backend relies on.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;

use crate::constants::{EMPTY_PAYLOAD, HEADER_LEN, MAX_FRAME_SIZE};
use crate::error::CodecError;

/// Encode one frame.
///
/// `id_fields` names the JSON keys holding 64-bit identifiers; any of them
/// holding a quoted decimal is rewritten to a bare JSON number.
pub fn encode_frame<T: Serialize + ?Sized>(
    packet_type: u8,
    payload: Option<&T>,
    id_fields: &[&str],
) -> Result<Vec<u8>, CodecError> {
    let body = match payload {
        Some(p) => {
            let mut value = serde_json::to_value(p)?;
            unquote_ids(&mut value, id_fields);
            serde_json::to_vec(&value)?
        }
        None => vec![EMPTY_PAYLOAD],
    };

    let total = HEADER_LEN + body.len();
    if total > MAX_FRAME_SIZE {
        return Err(CodecError::Malformed(format!(
            "frame of {total} bytes exceeds limit"
        )));
    }
    let len = u32::try_from(total)
        .map_err(|_| CodecError::Malformed(format!("frame of {total} bytes exceeds limit")))?;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32_le(len);
    buf.put_u8(packet_type);
    buf.put_slice(&body);
    Ok(buf.to_vec())
}

/// Decode one frame into its type byte and JSON payload (`Null` when empty).
pub fn decode_frame(data: &[u8]) -> Result<(u8, Value), CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::Malformed(format!(
            "frame of {} bytes is shorter than the header",
            data.len()
        )));
    }
    if data.len() > MAX_FRAME_SIZE {
        return Err(CodecError::Malformed(format!(
            "frame of {} bytes exceeds limit",
            data.len()
        )));
    }

    let declared = u32::from_be_bytes([data[3], data[2], data[1], data[0]]) as usize;
    if declared != data.len() {
        return Err(CodecError::Malformed(format!(
            "declared length {declared} does not match frame size {}",
            data.len()
        )));
    }

    let packet_type = data[4];
    let body = &data[HEADER_LEN..];
    if body.is_empty() || body == [EMPTY_PAYLOAD] {
        return Ok((packet_type, Value::Null));
    }

    let value = serde_json::from_slice(body)
        .map_err(|e| CodecError::Malformed(format!("invalid JSON payload: {e}")))?;
    Ok((packet_type, value))
}

/// Rewrite `"123"` to `123` for every listed key, at any depth.
pub fn unquote_ids(value: &mut Value, id_fields: &[&str]) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if id_fields.contains(&key.as_str()) {
                    if let Value::String(s) = v {
                        if let Ok(n) = s.parse::<u64>() {
                            *v = Value::from(n);
                            continue;
                        }
                    }
                }
                unquote_ids(v, id_fields);
            }
        }
        Value::Array(items) => {
            for v in items {
                unquote_ids(v, id_fields);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::constants::ID_FIELDS;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(6, None::<&Value>, ID_FIELDS).unwrap();
        assert_eq!(frame, vec![6, 0, 0, 0, 6, 0]);

        let frame = encode_frame(2, Some(&json!({"A": 1})), ID_FIELDS).unwrap();
        let body = br#"{"A":1}"#;
        assert_eq!(frame.len(), HEADER_LEN + body.len());
        assert_eq!(&frame[..4], &(frame.len() as u32).to_le_bytes());
        assert_eq!(frame[4], 2);
        assert_eq!(&frame[5..], body);
    }

    #[test]
    fn test_roundtrip_normalizes_quoted_ids() {
        let payload = json!({
            "ChannelID": "18446744073709551615",
            "Name": "42",
            "Messages": [{"MessageID": "7", "Text": "hi"}],
        });
        let frame = encode_frame(2, Some(&payload), ID_FIELDS).unwrap();
        let (ty, value) = decode_frame(&frame).unwrap();

        assert_eq!(ty, 2);
        assert_eq!(value["ChannelID"].as_u64(), Some(u64::MAX));
        // non-ID strings are left alone
        assert_eq!(value["Name"], json!("42"));
        assert_eq!(value["Messages"][0]["MessageID"].as_u64(), Some(7));
    }

    #[test]
    fn test_oversized_frame_is_refused() {
        let text = "x".repeat(MAX_FRAME_SIZE);
        let err = encode_frame(1, Some(&json!({ "Text": text })), ID_FIELDS).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));

        // the largest body that still fits
        let fits = vec![b'a'; MAX_FRAME_SIZE - HEADER_LEN - 2];
        let text = String::from_utf8(fits).unwrap();
        let frame = encode_frame(1, Some(&json!(text)), ID_FIELDS).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_roundtrip_null() {
        let frame = encode_frame(6, None::<&Value>, ID_FIELDS).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), (6, Value::Null));
    }

    #[test]
    fn test_large_ids_stay_exact() {
        let id = (1u64 << 60) + 1;
        let frame = encode_frame(1, Some(&json!({ "MessageID": id })), ID_FIELDS).unwrap();
        let (_, value) = decode_frame(&frame).unwrap();
        assert_eq!(value["MessageID"].as_u64(), Some(id));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let mut frame = encode_frame(1, Some(&json!({"A": 1})), ID_FIELDS).unwrap();
        frame.push(b' ');
        assert!(matches!(decode_frame(&frame), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_short_frame_is_malformed() {
        assert!(matches!(
            decode_frame(&[1, 0, 0]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let body = b"{not json";
        let mut frame = ((HEADER_LEN + body.len()) as u32).to_le_bytes().to_vec();
        frame.push(1);
        frame.extend_from_slice(body);
        let err = decode_frame(&frame).unwrap_err();
        assert!(err.is_droppable());
    }
}
