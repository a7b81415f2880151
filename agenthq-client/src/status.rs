//! Connection status snapshot.

use agenthq_protocol::ServerInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the Gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// What the last successful handshake told us about the Gateway.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionInfo {
    pub server: Option<ServerInfo>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub uptime_ms: Option<u64>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the client, safe to serve to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub state: ConnectionState,
    pub server: Option<ServerInfo>,
    pub available_methods: Vec<String>,
    pub available_events: Vec<String>,
    pub uptime_ms: Option<u64>,
    #[serde(rename = "gatewayUrl")]
    pub endpoint: Option<String>,
    pub pending_requests: usize,
    /// Age of the longest-waiting request, if any.
    pub oldest_request_age_ms: Option<u64>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl GatewayStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
