//! Connection management.
//!
//! A [`Connection`] owns at most one WebSocket at a time. After a successful
//! handshake a single background session task takes over the read half: it
//! runs the read loop, and when the socket goes away it runs the reconnect
//! loop, then the next read loop, and so on until reconnection is disabled.
//! The read loop and the reconnect loop can therefore never overlap.
//!
//! Outbound frames go through a per-socket writer task, so a caller waiting
//! on a slow socket holds no lock and is bounded by its own timeout.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::dispatch::EventDispatcher;
use crate::error::ClientError;
use crate::handshake::{origin_for, perform_handshake};
use crate::pending::PendingRequests;
use crate::status::{ConnectionState, GatewayStatus, SessionInfo};
use crate::tls;
use agenthq_protocol::{
    decode, decode_bytes, encode, EventFrame, Frame, GatewayEvent, HelloOk, ProtocolError,
};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// A frame queued for the writer task and the slot that reports its send.
type Outbound = (Message, oneshot::Sender<Result<(), WsError>>);

/// First id handed to application requests in each epoch ("1" is the handshake's).
const FIRST_REQUEST_ID: u64 = 2;

/// Upper bound on the close handshake during disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sending side of the current socket's writer task.
struct OutboundQueue {
    tx: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl OutboundQueue {
    fn spawn(writer: WsWriter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(writer, rx));
        Self { tx, task }
    }

    /// Lets queued frames drain and the socket close, then gives up.
    async fn close(self) {
        let Self { tx, task } = self;
        drop(tx);
        let abort = task.abort_handle();
        if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
            tracing::debug!("WebSocket close timed out");
            abort.abort();
        }
    }
}

async fn write_loop(mut writer: WsWriter, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some((message, sent)) = rx.recv().await {
        let result = writer.send(message).await;
        let failed = result.is_err();
        let _ = sent.send(result);
        if failed {
            break;
        }
    }
    // Frames still queued are dropped; their callers see ConnectionClosed.
    drop(rx);
    tracing::debug!("Closing WebSocket");
    let _ = writer.close().await;
}

/// Connection to the Gateway.
pub struct Connection {
    config: ClientConfig,
    state: watch::Sender<ConnectionState>,
    session: RwLock<SessionInfo>,
    /// Writer task of the current socket. Request ids are allocated under
    /// this lock so an id always belongs to the epoch of the socket it is
    /// sent on.
    writer: parking_lot::Mutex<Option<OutboundQueue>>,
    pending: PendingRequests,
    dispatcher: EventDispatcher,
    backoff: parking_lot::Mutex<Backoff>,
    next_id: AtomicU64,
    reconnect: AtomicBool,
    stopping: AtomicBool,
    session_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    connect_lock: Mutex<()>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::from_config(&config.reconnect);
        let reconnect = config.reconnect.enabled;
        Self {
            config,
            state,
            session: RwLock::new(SessionInfo::default()),
            writer: parking_lot::Mutex::new(None),
            pending: PendingRequests::new(),
            dispatcher: EventDispatcher::new(),
            backoff: parking_lot::Mutex::new(backoff),
            next_id: AtomicU64::new(FIRST_REQUEST_ID),
            reconnect: AtomicBool::new(reconnect),
            stopping: AtomicBool::new(false),
            session_task: parking_lot::Mutex::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Connection state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    fn endpoint(&self) -> Option<&str> {
        self.config.url.as_deref().filter(|u| !u.is_empty())
    }

    fn reconnect_enabled(&self) -> bool {
        self.reconnect.load(Ordering::SeqCst)
    }

    fn session_alive(&self) -> bool {
        self.session_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Connects and performs the handshake.
    ///
    /// Without a configured URL this logs a warning and returns `Ok`. While a
    /// session is already running (connected or reconnecting) it returns
    /// `Ok` without doing anything. If the handshake fails and reconnection is
    /// enabled, the reconnect loop is started before the error is returned.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let Some(url) = self.endpoint().map(str::to_string) else {
            tracing::warn!("Gateway URL not configured, skipping connect");
            return Ok(());
        };

        let _serial = self.connect_lock.lock().await;
        if self.session_alive() {
            tracing::debug!("connect() called with a live session");
            return Ok(());
        }

        self.stopping.store(false, Ordering::SeqCst);
        self.reconnect
            .store(self.config.reconnect.enabled, Ordering::SeqCst);

        tracing::info!("Connecting to gateway at {}", url);
        match self.establish(&url).await {
            Ok(reader) => {
                if self.spawn_session(Some(reader)) {
                    Ok(())
                } else {
                    tracing::debug!("Disconnected while the handshake was in flight");
                    self.close_writer().await;
                    self.pending.fail_all(|| ClientError::Cancelled);
                    self.set_state(ConnectionState::Disconnected);
                    Err(ClientError::Cancelled)
                }
            }
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(e) => {
                tracing::error!("Failed to connect to gateway: {}", e);
                if self.reconnect_enabled() {
                    self.spawn_session(None);
                }
                Err(e)
            }
        }
    }

    /// Stops the client: disables reconnection, stops the session task,
    /// closes the socket and fails every pending request with
    /// [`ClientError::Cancelled`].
    ///
    /// Must not be awaited from inside an event callback, since callbacks
    /// run on the session task this call waits for.
    pub async fn disconnect(&self) {
        self.reconnect.store(false, Ordering::SeqCst);
        self.stopping.store(true, Ordering::SeqCst);

        let task = self.session_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        self.close_writer().await;

        let cancelled = self.pending.fail_all(|| ClientError::Cancelled);
        if cancelled > 0 {
            tracing::info!("Cancelled {} pending requests", cancelled);
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from gateway");
    }

    /// Sends a request and waits for its response payload.
    ///
    /// `timeout` covers the whole exchange: queueing, the socket write, and
    /// the wait for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (mut guard, sent) = {
            let slot = self.writer.lock();
            let queue = slot.as_ref().ok_or(ClientError::NotConnected)?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            let text = encode(&Frame::request(&id, method, params))?;
            let guard = self.pending.register(id, method);
            let (ack, sent) = oneshot::channel();
            queue
                .tx
                .send((Message::text(text), ack))
                .map_err(|_| ClientError::ConnectionClosed)?;
            (guard, sent)
        };

        let exchange = async {
            match sent.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ClientError::from(e)),
                Err(_) => return Err(ClientError::ConnectionClosed),
            }
            tracing::debug!("Request id={} method={} sent", guard.id(), method);
            guard.wait().await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("Request id={} method={} timed out", guard.id(), method);
                Err(ClientError::timeout(format!("request {}", method), timeout))
            }
        }
    }

    /// Returns a snapshot of the connection.
    pub fn status(&self) -> GatewayStatus {
        let session = self.session.read();
        GatewayStatus {
            state: self.state(),
            server: session.server.clone(),
            available_methods: session.methods.clone(),
            available_events: session.events.clone(),
            uptime_ms: session.uptime_ms,
            endpoint: self.config.url.clone(),
            pending_requests: self.pending.len(),
            oldest_request_age_ms: self
                .pending
                .oldest_age()
                .map(|age| age.as_millis() as u64),
            connected_at: session.connected_at,
            last_tick_at: session.last_tick_at,
        }
    }

    /// Opens a socket, runs the handshake and installs the new epoch.
    async fn establish(&self, url: &str) -> Result<WsReader, ClientError> {
        self.set_state(ConnectionState::Connecting);
        match self.open(url).await {
            Ok((writer, reader, hello)) => match self.install(writer, hello) {
                Ok(()) => Ok(reader),
                Err(mut writer) => {
                    tracing::debug!("Handshake finished after disconnect, dropping socket");
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await;
                    self.set_state(ConnectionState::Disconnected);
                    Err(ClientError::Cancelled)
                }
            },
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open(&self, url: &str) -> Result<(WsWriter, WsReader, HelloOk), ClientError> {
        let mut request = url.into_client_request()?;
        if let Some(origin) = origin_for(url) {
            match HeaderValue::from_str(&origin) {
                Ok(value) => {
                    request.headers_mut().insert(ORIGIN, value);
                }
                Err(e) => tracing::warn!("Cannot use Origin '{}': {}", origin, e),
            }
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        let connector = tls::connector_for(&self.config.tls)?;

        let connect_timeout = self.config.connect_timeout();
        let (stream, _) = tokio::time::timeout(
            connect_timeout,
            connect_async_tls_with_config(request, Some(ws_config), false, connector),
        )
        .await
        .map_err(|_| ClientError::timeout("connect", connect_timeout))??;
        tracing::debug!("WebSocket open, starting handshake");

        let (mut writer, mut reader) = stream.split();
        let params = self.config.connect_params();
        match perform_handshake(
            &mut writer,
            &mut reader,
            &params,
            self.config.handshake_timeout(),
        )
        .await
        {
            Ok(hello) => Ok((writer, reader, hello)),
            Err(e) => {
                let _ = writer.close().await;
                Err(e)
            }
        }
    }

    /// Publishes a handshaken socket as the new epoch.
    ///
    /// Hands the writer back if a disconnect started in the meantime.
    fn install(&self, writer: WsWriter, hello: HelloOk) -> Result<(), WsWriter> {
        let mut slot = self.writer.lock();
        if self.stopping.load(Ordering::SeqCst) {
            return Err(writer);
        }
        *self.session.write() = SessionInfo {
            server: Some(hello.server),
            methods: hello.features.methods,
            events: hello.features.events,
            uptime_ms: hello.snapshot.uptime_ms,
            connected_at: Some(Utc::now()),
            last_tick_at: None,
        };
        self.next_id.store(FIRST_REQUEST_ID, Ordering::SeqCst);
        *slot = Some(OutboundQueue::spawn(writer));
        self.backoff.lock().reset();
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Starts the session task unless a disconnect is under way.
    fn spawn_session(self: &Arc<Self>, reader: Option<WsReader>) -> bool {
        let mut slot = self.session_task.lock();
        if self.stopping.load(Ordering::SeqCst) {
            return false;
        }
        let conn = Arc::clone(self);
        *slot = Some(tokio::spawn(conn.run_session(reader)));
        true
    }

    async fn run_session(self: Arc<Self>, mut reader: Option<WsReader>) {
        loop {
            let current = match reader.take() {
                Some(reader) => reader,
                None => match self.reconnect_loop().await {
                    Some(reader) => reader,
                    None => return,
                },
            };

            self.read_loop(current).await;
            self.connection_lost().await;

            if !self.reconnect_enabled() {
                tracing::debug!("Reconnection disabled, session ends");
                return;
            }
        }
    }

    async fn reconnect_loop(&self) -> Option<WsReader> {
        let url = self.endpoint()?.to_string();
        loop {
            if !self.reconnect_enabled() {
                return None;
            }
            let delay = self.backoff.lock().next_delay();
            self.set_state(ConnectionState::Reconnecting);
            tracing::info!("Reconnecting in {:?}...", delay);
            tokio::time::sleep(delay).await;

            if !self.reconnect_enabled() {
                return None;
            }
            match self.establish(&url).await {
                Ok(reader) => {
                    tracing::info!("Reconnected to gateway");
                    return Some(reader);
                }
                Err(e) => tracing::warn!("Reconnect failed: {}", e),
            }
        }
    }

    /// Consumes inbound frames until the socket closes, errors, or goes
    /// silent for longer than the heartbeat timeout.
    async fn read_loop(&self, mut reader: WsReader) {
        tracing::debug!("read_loop started");
        let heartbeat = self.config.heartbeat_timeout();

        loop {
            let next = match heartbeat {
                Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("No frames for {:?}, treating connection as lost", limit);
                        return;
                    }
                },
                None => reader.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_frame(decode(text.as_str())).await,
                Some(Ok(Message::Binary(bytes))) => self.handle_frame(decode_bytes(&bytes)).await,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Gateway closed the connection: {:?}", frame);
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("Gateway connection error: {}", e);
                    return;
                }
                None => {
                    tracing::info!("Gateway connection closed");
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, frame: Result<Frame, ProtocolError>) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Skipping malformed frame: {}", e);
                return;
            }
        };

        match frame {
            Frame::Response(response) => {
                self.pending.resolve(response);
            }
            Frame::Event(event) => self.handle_event(event).await,
            Frame::Request(request) => {
                tracing::warn!("Ignoring request frame from gateway: {}", request.method)
            }
        }
    }

    async fn handle_event(&self, event: EventFrame) {
        match event.typed() {
            GatewayEvent::Tick(_) => {
                self.session.write().last_tick_at = Some(Utc::now());
                tracing::trace!("tick");
                return;
            }
            GatewayEvent::Shutdown(shutdown) => {
                tracing::info!(
                    "Gateway shutting down: {}",
                    shutdown.reason.as_deref().unwrap_or("no reason given")
                );
                if let Some(hint) = shutdown.restart_hint() {
                    tracing::info!("Gateway expects to restart in {:?}", hint);
                    self.backoff.lock().apply_hint(hint);
                }
            }
            _ => {}
        }
        self.dispatcher.dispatch(&event).await;
    }

    /// Tears down the epoch after the read loop ends.
    async fn connection_lost(&self) {
        self.set_state(ConnectionState::Disconnected);
        if let Some(queue) = self.writer.lock().take() {
            queue.task.abort();
        }
        let failed = self.pending.fail_all(|| ClientError::ConnectionClosed);
        if failed > 0 {
            tracing::warn!("Connection lost with {} requests in flight", failed);
        }
    }

    async fn close_writer(&self) {
        let queue = self.writer.lock().take();
        if let Some(queue) = queue {
            queue.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallbackResult;
    use serde_json::json;

    fn record_events(conn: &Connection) -> Arc<parking_lot::Mutex<Vec<String>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        conn.dispatcher()
            .on_any_event_sync(move |event: &EventFrame| -> CallbackResult {
                sink.lock().push(event.event.clone());
                Ok(())
            });
        seen
    }

    #[tokio::test]
    async fn test_connect_without_url_is_noop() {
        let conn = Arc::new(Connection::new(ClientConfig::default()));
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.session_alive());
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let conn = Connection::new(ClientConfig::new("ws://127.0.0.1:9"));
        let err = conn
            .send_request("agents.list", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert_eq!(conn.status().pending_requests, 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let conn = Connection::new(ClientConfig::new("ws://127.0.0.1:9"));
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.reconnect_enabled());
    }

    #[test]
    fn test_status_while_disconnected() {
        let conn = Connection::new(ClientConfig::new("ws://gw:18789"));
        let status = conn.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.endpoint.as_deref(), Some("ws://gw:18789"));
        assert!(status.server.is_none());
        assert!(status.available_methods.is_empty());
    }

    #[tokio::test]
    async fn test_tick_is_liveness_only() {
        let conn = Connection::new(ClientConfig::new("ws://127.0.0.1:9"));
        let seen = record_events(&conn);

        for payload in [json!({"ts": 1.7e12}), json!(42), Value::Null, json!({"ts": 5})] {
            conn.handle_event(EventFrame::new("tick", payload)).await;
        }
        conn.handle_event(EventFrame::new("presence", json!({}))).await;

        assert_eq!(*seen.lock(), vec!["presence".to_string()]);
        assert!(conn.status().last_tick_at.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_hint_accepts_fractional_millis() {
        let conn = Connection::new(ClientConfig::new("ws://127.0.0.1:9"));
        let seen = record_events(&conn);

        conn.handle_event(EventFrame::new(
            "shutdown",
            json!({"reason": "upgrade", "restartExpectedMs": 1500.0}),
        ))
        .await;
        assert_eq!(
            conn.backoff.lock().next_delay(),
            Duration::from_millis(1500)
        );

        // A zero hint leaves the schedule alone.
        conn.handle_event(EventFrame::new("shutdown", json!({"restartExpectedMs": 0})))
            .await;
        assert_eq!(conn.backoff.lock().next_delay(), Duration::from_secs(3));
        assert_eq!(seen.lock().len(), 2);
    }
}
