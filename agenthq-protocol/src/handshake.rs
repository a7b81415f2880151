//! Session handshake payloads.
//!
//! The handshake is three messages: the Gateway pushes `connect.challenge`,
//! the client sends `req` id `"1"` method `connect` with [`ConnectParams`],
//! and the Gateway answers with a [`HelloOk`] payload.

use crate::{HELLO_OK, OPERATOR_ROLE, OPERATOR_SCOPES, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client descriptor sent in the connect request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: "webchat".to_string(),
            version: "1.0.0".to_string(),
            platform: "web".to_string(),
            mode: "webchat".to_string(),
        }
    }
}

/// Authentication block of the connect request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub permissions: Map<String, Value>,
    pub auth: AuthParams,
    pub locale: String,
    pub user_agent: String,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo::default(),
            role: OPERATOR_ROLE.to_string(),
            scopes: OPERATOR_SCOPES.iter().map(|s| s.to_string()).collect(),
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: Map::new(),
            auth: AuthParams::default(),
            locale: "en-US".to_string(),
            user_agent: "agent-hq/1.0.0".to_string(),
        }
    }
}

impl ConnectParams {
    pub fn new(client: ClientInfo) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds scopes on top of the operator scopes.
    ///
    /// The operator scopes always stay first and are never removed;
    /// duplicates are dropped.
    pub fn with_extra_scopes<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scope in extra {
            let scope = scope.into();
            if !self.scopes.contains(&scope) {
                self.scopes.push(scope);
            }
        }
        self.ensure_operator_scopes();
        self
    }

    /// Restores any operator scope missing from `scopes`.
    pub fn ensure_operator_scopes(&mut self) {
        let mut scopes: Vec<String> = OPERATOR_SCOPES.iter().map(|s| s.to_string()).collect();
        for scope in self.scopes.drain(..) {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        self.scopes = scopes;
    }
}

/// Server identity reported in `hello-ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
}

/// Methods and events the Gateway exposes to this session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Server state snapshot included in `hello-ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub uptime_ms: Option<u64>,
}

/// Connection policy advertised by the Gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Payload of a successful connect response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub protocol: Option<u32>,
    #[serde(default)]
    pub server: ServerInfo,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub snapshot: Snapshot,
    #[serde(default)]
    pub policy: Option<Policy>,
}

impl HelloOk {
    pub fn new(server: ServerInfo, features: Features) -> Self {
        Self {
            kind: HELLO_OK.to_string(),
            protocol: Some(PROTOCOL_VERSION),
            server,
            features,
            snapshot: Snapshot::default(),
            policy: None,
        }
    }

    pub fn with_uptime(mut self, uptime_ms: u64) -> Self {
        self.snapshot.uptime_ms = Some(uptime_ms);
        self
    }
}
