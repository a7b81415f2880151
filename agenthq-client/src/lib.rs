//! # agenthq-client
//!
//! Client library for the agent fleet Gateway.
//!
//! This crate provides:
//! - WebSocket connection with the challenge / connect / hello-ok handshake
//! - Concurrent request/response correlation with per-call timeouts
//! - Event subscriptions that survive reconnects
//! - Automatic reconnection with exponential backoff
//! - Optional TLS customization for `wss://` endpoints

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod pending;
pub mod status;
pub mod tls;

pub use client::GatewayClient;
pub use config::{ClientConfig, ConfigError, ReconnectConfig, TlsClientConfig};
pub use connection::Connection;
pub use dispatch::{CallbackError, CallbackResult, SubscriptionId};
pub use error::{ClientError, ErrorKind};
pub use status::{ConnectionState, GatewayStatus};
