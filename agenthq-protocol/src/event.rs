//! Typed views over event frames.
//!
//! Event payloads arrive as free-form JSON. The few events the client acts
//! on have typed payloads here; every other name, including names added to
//! the Gateway after this crate was built, maps to [`GatewayEvent::Other`].

use crate::frame::EventFrame;
use crate::{CHALLENGE_EVENT, SHUTDOWN_EVENT, TICK_EVENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Payload of `connect.challenge`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengePayload {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub ts: Option<u64>,
}

impl ChallengePayload {
    fn from_value(payload: &Value) -> Self {
        Self {
            nonce: payload.get("nonce").and_then(Value::as_str).map(str::to_string),
            ts: payload.get("ts").and_then(Value::as_u64),
        }
    }
}

/// Payload of `tick`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    #[serde(default)]
    pub ts: Option<f64>,
}

impl TickPayload {
    fn from_value(payload: &Value) -> Self {
        Self {
            ts: payload.get("ts").and_then(Value::as_f64),
        }
    }
}

/// Payload of `shutdown`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownPayload {
    #[serde(default)]
    pub reason: Option<String>,
    /// Milliseconds until the Gateway expects to accept connections again.
    #[serde(default)]
    pub restart_expected_ms: Option<f64>,
}

impl ShutdownPayload {
    fn from_value(payload: &Value) -> Self {
        Self {
            reason: payload.get("reason").and_then(Value::as_str).map(str::to_string),
            restart_expected_ms: payload.get("restartExpectedMs").and_then(Value::as_f64),
        }
    }

    /// Returns the advertised restart delay. Zero or negative means "no hint".
    pub fn restart_hint(&self) -> Option<Duration> {
        self.restart_expected_ms
            .filter(|ms| *ms > 0.0)
            .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
    }
}

/// Typed event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    ConnectChallenge(ChallengePayload),
    Tick(TickPayload),
    Shutdown(ShutdownPayload),
    /// Any event name the client does not act on.
    Other { name: String },
}

impl GatewayEvent {
    /// Classifies an event frame by name.
    ///
    /// Known names always map to their variant. Payload fields that are
    /// missing or of the wrong type read as `None`.
    pub fn from_frame(frame: &EventFrame) -> Self {
        let payload = &frame.payload;
        match frame.event.as_str() {
            CHALLENGE_EVENT => GatewayEvent::ConnectChallenge(ChallengePayload::from_value(payload)),
            TICK_EVENT => GatewayEvent::Tick(TickPayload::from_value(payload)),
            SHUTDOWN_EVENT => GatewayEvent::Shutdown(ShutdownPayload::from_value(payload)),
            name => GatewayEvent::Other {
                name: name.to_string(),
            },
        }
    }

    /// Returns the wire name of this event.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::ConnectChallenge(_) => CHALLENGE_EVENT,
            GatewayEvent::Tick(_) => TICK_EVENT,
            GatewayEvent::Shutdown(_) => SHUTDOWN_EVENT,
            GatewayEvent::Other { name } => name,
        }
    }
}
