//! Text codec for Gateway frames.
//!
//! The transport already delimits messages, so a frame is exactly one JSON
//! document. Decoding is strict about the envelope (object, known `type`)
//! and reports shape errors per frame kind so readers can log something
//! useful before skipping the frame.

use crate::error::ProtocolError;
use crate::frame::Frame;
use serde_json::Value;

/// Encodes a frame as JSON text.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a frame from JSON text.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    decode_value(value)
}

/// Decodes a frame from raw bytes (binary messages).
pub fn decode_bytes(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode(text)
}

/// Decodes a frame from an already-parsed JSON value.
pub fn decode_value(value: Value) -> Result<Frame, ProtocolError> {
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(_) | None => return Err(ProtocolError::MissingField("type")),
    };

    let kind: &'static str = match kind {
        "req" => "req",
        "res" => "res",
        "event" => "event",
        other => return Err(ProtocolError::UnknownFrameType(other.to_string())),
    };

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{EventFrame, ResponseFrame};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let frame = decode(r#"{"type":"res","id":"4","ok":true,"payload":{"agents":[]}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Response(ResponseFrame::ok("4", json!({"agents": []})))
        );
    }

    #[test]
    fn test_encode_event() {
        let text = encode(&Frame::Event(EventFrame::new("presence", json!({})).with_seq(3))).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["seq"], 3);
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_decode_non_object() {
        assert!(matches!(decode("[1,2,3]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(decode("\"res\""), Err(ProtocolError::NotAnObject)));
    }

    #[test]
    fn test_decode_missing_or_unknown_type() {
        assert!(matches!(
            decode(r#"{"id":"1","ok":true}"#),
            Err(ProtocolError::MissingField("type"))
        ));
        assert!(matches!(
            decode(r#"{"type":7}"#),
            Err(ProtocolError::MissingField("type"))
        ));
        match decode(r#"{"type":"hello"}"#) {
            Err(ProtocolError::UnknownFrameType(kind)) => assert_eq!(kind, "hello"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_shape() {
        match decode(r#"{"type":"res","id":"1"}"#) {
            Err(ProtocolError::Malformed { kind, reason }) => {
                assert_eq!(kind, "res");
                assert!(reason.contains("ok"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            decode_bytes(&[0xff, 0xfe, 0x00]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics(input in ".*") {
            let _ = decode(&input);
        }

        #[test]
        fn decode_bytes_never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_bytes(&input);
        }

        #[test]
        fn unknown_type_is_reported(kind in "[a-z]{1,12}") {
            prop_assume!(kind != "req" && kind != "res" && kind != "event");
            let text = format!(r#"{{"type":"{}"}}"#, kind);
            let is_unknown = matches!(decode(&text), Err(ProtocolError::UnknownFrameType(_)));
            prop_assert!(is_unknown);
        }
    }
}
