//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via AGENTHQ_CONFIG)
//! 3. Environment variables

use agenthq_protocol::{ClientInfo, ConnectParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default maximum inbound message size (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Gateway client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway endpoint (`ws://` or `wss://`). `None` disables the client.
    pub url: Option<String>,
    /// Auth token sent in the connect request.
    pub token: Option<String>,
    /// Timeout for opening the socket, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout for each handshake stage, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Default request timeout, in milliseconds.
    pub request_timeout_ms: u64,
    /// Treat the connection as dead after this long without any frame.
    pub heartbeat_timeout_ms: Option<u64>,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Client descriptor sent during the handshake.
    pub client: ClientInfo,
    pub locale: String,
    pub user_agent: String,
    /// Scopes requested in addition to the operator scopes.
    pub extra_scopes: Vec<String>,
    /// TLS settings for `wss://` endpoints.
    pub tls: TlsClientConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let params = ConnectParams::default();
        Self {
            url: None,
            token: None,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            heartbeat_timeout_ms: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            reconnect: ReconnectConfig::default(),
            client: params.client,
            locale: params.locale,
            user_agent: params.user_agent,
            extra_scopes: Vec::new(),
            tls: TlsClientConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("AGENTHQ_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OPENCLAW_GATEWAY_URL") {
            self.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(token) = std::env::var("OPENCLAW_GATEWAY_TOKEN") {
            self.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(timeout) = std::env::var("AGENTHQ_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.request_timeout_ms = ms;
            }
        }
        if let Ok(enabled) = std::env::var("AGENTHQ_RECONNECT") {
            self.reconnect.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }

    /// Checks the configuration for values the client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref url) = self.url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::Validation(format!(
                    "gateway URL must use ws:// or wss://, got '{}'",
                    url
                )));
            }
        }
        if self.heartbeat_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "heartbeat_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "reconnect.initial_delay_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Validation(format!(
                "reconnect.initial_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.initial_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if self.tls.client_cert_path.is_some() != self.tls.client_key_path.is_some() {
            return Err(ConfigError::Validation(
                "tls.client_cert_path and tls.client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns whether an endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn without_reconnect(mut self) -> Self {
        self.reconnect.enabled = false;
        self
    }

    pub fn with_extra_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }

    /// Builds the parameters of the handshake's connect request.
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams::new(self.client.clone())
            .with_token(self.token.clone())
            .with_locale(self.locale.clone())
            .with_user_agent(self.user_agent.clone())
            .with_extra_scopes(self.extra_scopes.iter().cloned())
    }
}

/// Reconnection policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect automatically after connectivity loss.
    pub enabled: bool,
    /// Delay before the first attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubled delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            enabled: true,
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// TLS configuration for `wss://` endpoints.
///
/// With every field unset, the bundled webpki roots are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsClientConfig {
    /// Path to PEM-encoded CA certificate(s) for server verification.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
}

impl TlsClientConfig {
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    /// Returns whether any setting departs from the default roots.
    pub fn is_customized(&self) -> bool {
        self.insecure || self.ca_cert_path.is_some() || self.client_cert_path.is_some()
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
