//! Client error types.

use agenthq_protocol::ErrorShape;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("not connected to gateway")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("protocol error: {0}")]
    Protocol(#[from] agenthq_protocol::ProtocolError),

    #[error("gateway error: {code} - {message}")]
    Server {
        code: String,
        message: String,
        details: Option<Value>,
        retryable: bool,
        retry_after_ms: Option<u64>,
    },

    #[error("request cancelled: client shut down")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// Coarse error classification for callers that map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An invalid configuration or TLS setup.
    Configuration,
    /// Not connected, handshake violation, or transport failure.
    Connection,
    /// A handshake stage or a request exceeded its deadline.
    Timeout,
    /// A frame could not be parsed.
    Protocol,
    /// The Gateway answered with `ok: false`.
    Server,
    /// The client was shut down while the call was pending.
    Cancelled,
}

impl ClientError {
    pub(crate) fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        ClientError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Builds a server error from a response's error block.
    pub fn from_shape(shape: Option<ErrorShape>) -> Self {
        match shape {
            Some(shape) => ClientError::Server {
                code: shape.code,
                message: shape.message,
                details: shape.details,
                retryable: shape.retryable,
                retry_after_ms: shape.retry_after_ms,
            },
            None => ClientError::Server {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
                details: None,
                retryable: false,
                retry_after_ms: None,
            },
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Config(_) | ClientError::TlsConfig(_) => ErrorKind::Configuration,
            ClientError::NotConnected
            | ClientError::ConnectionClosed
            | ClientError::Handshake(_)
            | ClientError::WebSocket(_) => ErrorKind::Connection,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Protocol(_) | ClientError::Json(_) => ErrorKind::Protocol,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::WebSocket(_) => true,
            ClientError::Timeout { .. } => true,
            ClientError::ConnectionClosed => true,
            ClientError::NotConnected => true,
            ClientError::Server { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
