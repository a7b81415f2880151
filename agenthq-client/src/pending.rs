//! Request correlation.
//!
//! Every in-flight request owns one entry in [`PendingRequests`]. An entry
//! leaves the table exactly once: either the read loop removes it to deliver
//! a response (or a teardown error), or the caller's [`PendingGuard`] removes
//! it when dropped (timeout, failed send, or an abandoned call). Whichever
//! side removes the entry first owns the result slot; the other finds
//! nothing and does nothing.

use crate::error::ClientError;
use agenthq_protocol::ResponseFrame;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type ResultSlot = oneshot::Sender<Result<Value, ClientError>>;

struct PendingRequest {
    /// Distinguishes registrations that share an id across epochs.
    token: u64,
    method: String,
    issued_at: Instant,
    slot: ResultSlot,
}

/// Table of requests awaiting a response.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<String, PendingRequest>,
    next_token: AtomicU64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request id and returns the guard the caller awaits on.
    pub fn register(&self, id: impl Into<String>, method: impl Into<String>) -> PendingGuard<'_> {
        let id = id.into();
        let (slot, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let previous = self.entries.insert(
            id.clone(),
            PendingRequest {
                token,
                method: method.into(),
                issued_at: Instant::now(),
                slot,
            },
        );
        if let Some(previous) = previous {
            // Ids are unique within an epoch; a collision means the old caller
            // would otherwise hang forever.
            tracing::warn!("Request id={} reused while still pending", id);
            let _ = previous.slot.send(Err(ClientError::ConnectionClosed));
        }
        PendingGuard {
            table: self,
            id,
            token,
            rx,
        }
    }

    /// Delivers a response to its caller.
    ///
    /// Returns `false` when no request is pending under that id (it already
    /// timed out, or never existed); the response is dropped.
    pub fn resolve(&self, response: ResponseFrame) -> bool {
        let Some((id, pending)) = self.entries.remove(&response.id) else {
            tracing::debug!("No pending request for response id={}", response.id);
            return false;
        };

        let result = if response.ok {
            Ok(response.payload.unwrap_or(Value::Null))
        } else {
            Err(ClientError::from_shape(response.error))
        };
        tracing::debug!(
            "Request id={} method={} answered in {:?}",
            id,
            pending.method,
            pending.issued_at.elapsed()
        );
        let _ = pending.slot.send(result);
        true
    }

    /// Fails every pending request. Returns how many were failed.
    pub fn fail_all(&self, make_error: impl Fn() -> ClientError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.entries.remove(&id) {
                let _ = pending.slot.send(Err(make_error()));
                failed += 1;
            }
        }
        failed
    }

    /// Number of requests currently pending.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Age of the oldest pending request.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.entries.iter().map(|e| e.issued_at.elapsed()).max()
    }

    fn forget(&self, id: &str, token: u64) -> bool {
        self.entries
            .remove_if(id, |_, pending| pending.token == token)
            .is_some()
    }
}

/// Caller-side handle of a pending request.
///
/// Dropping the guard removes the entry if it is still pending.
pub struct PendingGuard<'a> {
    table: &'a PendingRequests,
    id: String,
    token: u64,
    rx: oneshot::Receiver<Result<Value, ClientError>>,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the result slot to be filled.
    pub async fn wait(&mut self) -> Result<Value, ClientError> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.table.forget(&self.id, self.token) {
            tracing::debug!("Request id={} abandoned", self.id);
        }
    }
}
