//! In-process Gateway used by the integration tests.

#![allow(dead_code)]

use agenthq_client::{ClientConfig, ConnectionState, GatewayClient, ReconnectConfig};
use agenthq_protocol::{
    decode, encode, ErrorShape, EventFrame, Features, Frame, HelloOk, RequestFrame,
    ResponseFrame, ServerInfo,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const METHODS: [&str; 3] = ["agents.list", "cron.list", "sessions.list"];
pub const EVENTS: [&str; 3] = ["agent", "presence", "shutdown"];

/// How the gateway answers a request.
pub enum Reply {
    Respond(Value),
    Error(ErrorShape),
    Delay(Duration, Value),
    Ignore,
}

/// How the gateway runs the handshake.
#[derive(Debug, Clone)]
pub enum HandshakeMode {
    Normal,
    /// First frame is a `tick` event instead of the challenge.
    WrongChallenge,
    /// Connect answered with `ok: false`.
    Reject(String),
    /// Connect answered with `ok: true` but a payload type other than hello-ok.
    WrongType,
    /// Challenge sent, connect never answered.
    Stall,
    /// Connect answered with hello-ok after a delay.
    Slow(Duration),
    /// Handshake completes, then the socket is never read again.
    Deaf,
}

#[derive(Debug, Clone)]
enum Command {
    Event(EventFrame),
    Raw(String),
    Close,
}

type Handler = Arc<dyn Fn(&RequestFrame) -> Reply + Send + Sync>;

struct Shared {
    mode: Mutex<HandshakeMode>,
    handler: Handler,
    attempts: AtomicUsize,
    sessions: AtomicUsize,
    origins: Mutex<Vec<Option<String>>>,
    connects: Mutex<Vec<Value>>,
    requests: Mutex<Vec<RequestFrame>>,
    commands: broadcast::Sender<Command>,
}

pub struct MockGateway {
    url: String,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Reply + Send + Sync + 'static,
    {
        Self::start_with(HandshakeMode::Normal, handler).await
    }

    pub async fn start_with<F>(mode: HandshakeMode, handler: F) -> Self
    where
        F: Fn(&RequestFrame) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            mode: Mutex::new(mode),
            handler: Arc::new(handler),
            attempts: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            origins: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            commands,
        });

        let accept_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    serve(stream, shared).await;
                });
            }
        });

        Self {
            url: format!("ws://{}", addr),
            shared,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_mode(&self, mode: HandshakeMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Sockets accepted so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Handshakes completed so far.
    pub fn sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    pub fn origins(&self) -> Vec<Option<String>> {
        self.shared.origins.lock().clone()
    }

    pub fn connect_params(&self) -> Vec<Value> {
        self.shared.connects.lock().clone()
    }

    pub fn requests(&self) -> Vec<RequestFrame> {
        self.shared.requests.lock().clone()
    }

    pub fn push_event(&self, name: &str, payload: Value) {
        let _ = self
            .shared
            .commands
            .send(Command::Event(EventFrame::new(name, payload)));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.shared.commands.send(Command::Raw(text.to_string()));
    }

    /// Closes every established session.
    pub fn close_sessions(&self) {
        let _ = self.shared.commands.send(Command::Close);
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn text(frame: &Frame) -> Message {
    Message::text(encode(frame).unwrap())
}

fn hello() -> Value {
    let hello = HelloOk::new(
        ServerInfo {
            version: Some("2026.1.0".to_string()),
            commit: Some("abc1234".to_string()),
            conn_id: Some("conn-1".to_string()),
        },
        Features {
            methods: METHODS.iter().map(|m| m.to_string()).collect(),
            events: EVENTS.iter().map(|e| e.to_string()).collect(),
        },
    )
    .with_uptime(12_345);
    serde_json::to_value(hello).unwrap()
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    shared.attempts.fetch_add(1, Ordering::SeqCst);

    let mut origin = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        origin = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(response)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    shared.origins.lock().push(origin);
    let (mut sink, mut source) = ws.split();

    let mode = shared.mode.lock().clone();
    let challenge = match mode {
        HandshakeMode::WrongChallenge => EventFrame::new("tick", json!({"ts": 1})),
        _ => EventFrame::new("connect.challenge", json!({"nonce": "n-1", "ts": 1})),
    };
    if sink.send(text(&Frame::Event(challenge))).await.is_err() {
        return;
    }

    let connect = loop {
        match source.next().await {
            Some(Ok(Message::Text(body))) => match decode(body.as_str()) {
                Ok(Frame::Request(request)) => break request,
                _ => continue,
            },
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    shared.connects.lock().push(connect.params.clone());
    let mut commands = shared.commands.subscribe();
    let deaf = matches!(mode, HandshakeMode::Deaf);

    let answer = match mode {
        HandshakeMode::Normal | HandshakeMode::Deaf => ResponseFrame::ok(connect.id, hello()),
        HandshakeMode::Slow(delay) => {
            tokio::time::sleep(delay).await;
            ResponseFrame::ok(connect.id, hello())
        }
        HandshakeMode::Reject(message) => {
            ResponseFrame::error(connect.id, ErrorShape::new("UNAUTHORIZED", message))
        }
        HandshakeMode::WrongType => ResponseFrame::ok(connect.id, json!({"type": "hello-later"})),
        HandshakeMode::WrongChallenge | HandshakeMode::Stall => {
            // Hold the socket open without answering.
            while let Some(Ok(_)) = source.next().await {}
            return;
        }
    };
    let accepted = answer.ok;
    if sink.send(text(&Frame::Response(answer))).await.is_err() || !accepted {
        let _ = sink.close().await;
        return;
    }
    shared.sessions.fetch_add(1, Ordering::SeqCst);

    if deaf {
        // Both halves stay open; nothing is read until told to close.
        loop {
            match commands.recv().await {
                Ok(Command::Close) | Err(broadcast::error::RecvError::Closed) => return,
                _ => {}
            }
        }
    }

    let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel::<Message>();
    loop {
        tokio::select! {
            inbound = source.next() => {
                let body = match inbound {
                    Some(Ok(Message::Text(body))) => body,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                let Ok(Frame::Request(request)) = decode(body.as_str()) else {
                    continue;
                };
                shared.requests.lock().push(request.clone());
                match (shared.handler)(&request) {
                    Reply::Respond(payload) => {
                        let _ = sink.send(text(&Frame::Response(ResponseFrame::ok(request.id, payload)))).await;
                    }
                    Reply::Error(shape) => {
                        let _ = sink.send(text(&Frame::Response(ResponseFrame::error(request.id, shape)))).await;
                    }
                    Reply::Delay(delay, payload) => {
                        let tx = delayed_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(text(&Frame::Response(ResponseFrame::ok(request.id, payload))));
                        });
                    }
                    Reply::Ignore => {}
                }
            }
            Some(message) = delayed_rx.recv() => {
                let _ = sink.send(message).await;
            }
            command = commands.recv() => match command {
                Ok(Command::Event(event)) => {
                    let _ = sink.send(text(&Frame::Event(event))).await;
                }
                Ok(Command::Raw(body)) => {
                    let _ = sink.send(Message::text(body)).await;
                }
                Ok(Command::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = sink.close().await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }
}

/// Echoes params back for every method.
pub fn echo(request: &RequestFrame) -> Reply {
    Reply::Respond(json!({"method": request.method, "params": request.params}))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Client config with short delays suited to tests.
pub fn test_config(url: &str) -> ClientConfig {
    ClientConfig::new(url)
        .with_handshake_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig::new(
            Duration::from_millis(50),
            Duration::from_millis(200),
        ))
}

pub fn client(config: ClientConfig) -> GatewayClient {
    init_tracing();
    GatewayClient::new(config).unwrap()
}

/// Waits until the client reaches `state`.
pub async fn wait_for_state(client: &GatewayClient, state: ConnectionState) {
    let mut changes = client.state_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {}", state))
        .unwrap();
}

/// Polls `condition` until it holds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
