//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or encoding Gateway frames.
///
/// A `ProtocolError` always concerns a single frame. Readers log it and
/// move on to the next frame; it never says anything about the health of
/// the underlying connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(String),

    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },
}
