//! Gateway frame types.
//!
//! Every message on the socket is a single JSON object carrying a `type`
//! discriminator:
//!
//! ```text
//! {"type":"req",   "id":"7", "method":"agents.list", "params":{}}
//! {"type":"res",   "id":"7", "ok":true, "payload":{...}}
//! {"type":"res",   "id":"7", "ok":false, "error":{"code":"...","message":"..."}}
//! {"type":"event", "event":"presence", "payload":{...}, "seq":12}
//! ```

use crate::event::GatewayEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client -> server RPC call.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Server -> client RPC result.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Server -> client unsolicited push.
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl Frame {
    /// Builds a request frame.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Frame::Request(RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Returns the wire discriminator of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request(_) => "req",
            Frame::Response(_) => "res",
            Frame::Event(_) => "event",
        }
    }
}

/// Request frame body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique among the requests pending on one connection.
    pub id: String,
    /// RPC method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "empty_object")]
    pub params: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Error details carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    /// Server error code, e.g. `INVALID_REQUEST`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether the server considers the call safe to retry.
    #[serde(default)]
    pub retryable: bool,
    /// Suggested wait before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
            retry_after_ms: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, retry_after_ms: u64) -> Self {
        self.retryable = true;
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

/// Response frame body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request this answers.
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Event frame body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event name, e.g. `presence` or `connect.challenge`.
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// Server-side sequence number, if the event stream is sequenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Per-domain state versions at the time of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<HashMap<String, u64>>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
            state_version: None,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Returns a typed view of this event.
    pub fn typed(&self) -> GatewayEvent {
        GatewayEvent::from_frame(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let frame = Frame::request("3", "agents.list", json!({}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["id"], "3");
        assert_eq!(json["method"], "agents.list");
        assert_eq!(json["params"], json!({}));
    }

    #[test]
    fn test_error_response_uses_camel_case() {
        let frame = Frame::Response(ResponseFrame::error(
            "9",
            ErrorShape::new("UNAVAILABLE", "busy").with_retry_after(250),
        ));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "res");
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["retryAfterMs"], 250);
        assert_eq!(json["error"]["retryable"], true);
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_event_optional_fields() {
        let raw = json!({
            "type": "event",
            "event": "presence",
            "payload": {"agents": 2},
            "seq": 41,
            "stateVersion": {"presence": 7, "health": 3}
        });
        let frame: Frame = serde_json::from_value(raw).unwrap();
        let Frame::Event(event) = frame else {
            panic!("expected event frame");
        };
        assert_eq!(event.event, "presence");
        assert_eq!(event.seq, Some(41));
        assert_eq!(event.state_version.unwrap()["presence"], 7);
    }

    #[test]
    fn test_event_without_payload_defaults_to_null() {
        let frame: Frame = serde_json::from_str(r#"{"type":"event","event":"tick"}"#).unwrap();
        match frame {
            Frame::Event(event) => {
                assert!(event.payload.is_null());
                assert!(event.seq.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
