//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatch::{CallbackResult, SubscriptionId};
use crate::error::ClientError;
use crate::status::{ConnectionState, GatewayStatus};
use agenthq_protocol::EventFrame;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Client for the Gateway.
///
/// Cloning is cheap; every clone drives the same connection. The owner
/// should call [`GatewayClient::disconnect`] before dropping the last handle,
/// otherwise the background session keeps reconnecting.
#[derive(Clone)]
pub struct GatewayClient {
    conn: Arc<Connection>,
}

impl GatewayClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            conn: Arc::new(Connection::new(config)),
        })
    }

    /// Creates a client from `ClientConfig::load()`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::load()?)
    }

    /// Connects to the Gateway and performs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Stops the client and cancels everything in flight.
    pub async fn disconnect(&self) {
        self.conn.disconnect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Returns whether a Gateway URL is configured.
    pub fn is_configured(&self) -> bool {
        self.conn.config().is_configured()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Watches connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.conn.state_changes()
    }

    /// Returns a status snapshot. Works in every state.
    pub fn get_status(&self) -> GatewayStatus {
        self.conn.status()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Sends a request with the configured default timeout.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let timeout = self.conn.config().request_timeout();
        self.conn.send_request(method, params, timeout).await
    }

    /// Sends a request with an explicit timeout.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.conn.send_request(method, params, timeout).await
    }

    /// Sends a request with typed params and result.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let payload = self.send_request(method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Subscribes to one event name. Survives reconnects.
    pub fn on_event<F, Fut>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(EventFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.conn.dispatcher().on_event(name, callback)
    }

    /// Subscribes to every event. Survives reconnects.
    pub fn on_any_event<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(EventFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.conn.dispatcher().on_any_event(callback)
    }

    pub fn on_event_sync<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) -> CallbackResult + Send + Sync + 'static,
    {
        self.conn.dispatcher().on_event_sync(name, callback)
    }

    pub fn on_any_event_sync<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) -> CallbackResult + Send + Sync + 'static,
    {
        self.conn.dispatcher().on_any_event_sync(callback)
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.conn.dispatcher().unsubscribe(id)
    }
}
