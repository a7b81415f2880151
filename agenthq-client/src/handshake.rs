//! Session establishment.
//!
//! The Gateway opens every socket with a `connect.challenge` event. The
//! client answers with a single `connect` request (id `"1"`) and the Gateway
//! replies with a `hello-ok` payload describing itself. Nothing else may be
//! interleaved, so the exchange runs directly on the socket halves before
//! the read loop exists.

use crate::error::ClientError;
use agenthq_protocol::{
    decode, decode_bytes, encode, ConnectParams, EventFrame, Frame, HelloOk, CHALLENGE_EVENT,
    CONNECT_METHOD, CONNECT_REQUEST_ID, HELLO_OK,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Runs the three-step handshake and returns the Gateway's `hello-ok`.
///
/// Each stage that waits on the Gateway is bounded by `stage_timeout`.
pub async fn perform_handshake<W, R>(
    writer: &mut W,
    reader: &mut R,
    params: &ConnectParams,
    stage_timeout: Duration,
) -> Result<HelloOk, ClientError>
where
    W: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let challenge = next_frame(reader, stage_timeout, "handshake challenge").await?;
    check_challenge(challenge)?;
    tracing::debug!("Received connect challenge");

    let request = Frame::request(
        CONNECT_REQUEST_ID,
        CONNECT_METHOD,
        serde_json::to_value(params)?,
    );
    writer.send(Message::text(encode(&request)?)).await?;
    tracing::debug!("Connect request sent, waiting for hello");

    let response = next_frame(reader, stage_timeout, "handshake response").await?;
    let hello = check_hello(response)?;
    tracing::info!(
        "Handshake complete - server v{}, {} methods, {} events",
        hello.server.version.as_deref().unwrap_or("unknown"),
        hello.features.methods.len(),
        hello.features.events.len()
    );
    Ok(hello)
}

/// Reads the next data frame, skipping control messages.
async fn next_frame<R>(reader: &mut R, timeout: Duration, stage: &str) -> Result<Frame, ClientError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let read = async {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(decode(text.as_str())?),
                Some(Ok(Message::Binary(bytes))) => return Ok(decode_bytes(&bytes)?),
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    };
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| ClientError::timeout(stage, timeout))?
}

/// Accepts only a `connect.challenge` event.
pub fn check_challenge(frame: Frame) -> Result<EventFrame, ClientError> {
    match frame {
        Frame::Event(event) if event.event == CHALLENGE_EVENT => Ok(event),
        Frame::Event(event) => Err(ClientError::Handshake(format!(
            "expected {}, got event '{}'",
            CHALLENGE_EVENT, event.event
        ))),
        other => Err(ClientError::Handshake(format!(
            "expected {}, got '{}' frame",
            CHALLENGE_EVENT,
            other.kind()
        ))),
    }
}

/// Accepts only an `ok` response carrying a `hello-ok` payload.
pub fn check_hello(frame: Frame) -> Result<HelloOk, ClientError> {
    let response = match frame {
        Frame::Response(response) => response,
        other => {
            return Err(ClientError::Handshake(format!(
                "expected connect response, got '{}' frame",
                other.kind()
            )))
        }
    };

    if !response.ok {
        let message = response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ClientError::Handshake(message));
    }

    let payload = response.payload.unwrap_or(Value::Null);
    let kind = payload.get("type").and_then(Value::as_str);
    if kind != Some(HELLO_OK) {
        return Err(ClientError::Handshake(format!(
            "expected {}, got: {}",
            HELLO_OK,
            kind.unwrap_or("none")
        )));
    }

    serde_json::from_value(payload)
        .map_err(|e| ClientError::Handshake(format!("invalid {} payload: {}", HELLO_OK, e)))
}

/// Derives the `Origin` header for a Gateway URL: the HTTP(S) equivalent of
/// its scheme and authority.
pub fn origin_for(url: &str) -> Option<String> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        ("https", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        ("http", rest)
    } else {
        return None;
    };
    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme, authority))
}
