//! # agenthq-protocol
//!
//! Wire protocol for the agent fleet Gateway.
//!
//! This crate provides:
//! - Request/response/event frame types
//! - JSON text codec with per-frame error reporting
//! - Handshake payloads (`connect` params, `hello-ok`)
//! - Typed views over the events the client acts on

pub mod codec;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;

pub use codec::{decode, decode_bytes, encode};
pub use error::ProtocolError;
pub use event::{GatewayEvent, ShutdownPayload};
pub use frame::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame};
pub use handshake::{ClientInfo, ConnectParams, Features, HelloOk, ServerInfo};

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 3;

/// Request id reserved for the handshake's `connect` call.
pub const CONNECT_REQUEST_ID: &str = "1";

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// First event the Gateway sends on a new socket.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Payload type of a successful handshake response.
pub const HELLO_OK: &str = "hello-ok";

/// Liveness event.
pub const TICK_EVENT: &str = "tick";

/// Event announcing a Gateway restart.
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// Role requested by this client.
pub const OPERATOR_ROLE: &str = "operator";

/// Scopes every session requests.
pub const OPERATOR_SCOPES: [&str; 3] = ["operator.read", "operator.write", "operator.admin"];
