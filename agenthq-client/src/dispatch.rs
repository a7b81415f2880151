//! Event fan-out to subscribers.

use agenthq_protocol::EventFrame;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error type callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result type callbacks return.
pub type CallbackResult = Result<(), CallbackError>;

type AsyncCallback = Arc<dyn Fn(EventFrame) -> BoxFuture<'static, CallbackResult> + Send + Sync>;
type SyncCallback = Arc<dyn Fn(&EventFrame) -> CallbackResult + Send + Sync>;

/// Handle returned by registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct Subscribers {
    by_name: HashMap<String, Vec<Subscriber>>,
    wildcard: Vec<Subscriber>,
}

/// Routes event frames to per-name and wildcard subscribers.
///
/// Subscriptions live as long as the dispatcher, independent of any
/// connection, so they survive reconnects.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn add(&self, name: Option<String>, callback: Callback) -> SubscriptionId {
        let id = self.next_id();
        let subscriber = Subscriber { id, callback };
        let mut subscribers = self.subscribers.lock();
        match name {
            Some(name) => subscribers.by_name.entry(name).or_default().push(subscriber),
            None => subscribers.wildcard.push(subscriber),
        }
        id
    }

    /// Subscribes an async callback to one event name.
    pub fn on_event<F, Fut>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(EventFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.add(Some(name.into()), Callback::Async(boxed(callback)))
    }

    /// Subscribes an async callback to every event.
    pub fn on_any_event<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(EventFrame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.add(None, Callback::Async(boxed(callback)))
    }

    /// Subscribes a plain closure to one event name.
    pub fn on_event_sync<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) -> CallbackResult + Send + Sync + 'static,
    {
        self.add(Some(name.into()), Callback::Sync(Arc::new(callback)))
    }

    /// Subscribes a plain closure to every event.
    pub fn on_any_event_sync<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EventFrame) -> CallbackResult + Send + Sync + 'static,
    {
        self.add(None, Callback::Sync(Arc::new(callback)))
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        if let Some(pos) = subscribers.wildcard.iter().position(|s| s.id == id) {
            subscribers.wildcard.remove(pos);
            return true;
        }
        let mut found = false;
        subscribers.by_name.retain(|_, list| {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                found = true;
            }
            !list.is_empty()
        });
        found
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let subscribers = self.subscribers.lock();
        subscribers.wildcard.len() + subscribers.by_name.values().map(Vec::len).sum::<usize>()
    }

    /// Invokes the name-specific subscribers, then the wildcard subscribers,
    /// each list in registration order.
    ///
    /// A callback that fails or panics is logged and skipped.
    pub async fn dispatch(&self, event: &EventFrame) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let (named, wildcard) = {
            let subscribers = self.subscribers.lock();
            (
                subscribers
                    .by_name
                    .get(&event.event)
                    .cloned()
                    .unwrap_or_default(),
                subscribers.wildcard.clone(),
            )
        };

        for subscriber in named {
            if let Err(e) = invoke(&subscriber.callback, event).await {
                tracing::error!("Event callback error for {}: {}", event.event, e);
            }
        }
        for subscriber in wildcard {
            if let Err(e) = invoke(&subscriber.callback, event).await {
                tracing::error!("Global event callback error for {}: {}", event.event, e);
            }
        }
    }
}

fn boxed<F, Fut>(callback: F) -> AsyncCallback
where
    F: Fn(EventFrame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    Arc::new(move |event| callback(event).boxed())
}

async fn invoke(callback: &Callback, event: &EventFrame) -> CallbackResult {
    match callback {
        Callback::Sync(f) => match std::panic::catch_unwind(AssertUnwindSafe(|| f(event))) {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic).into()),
        },
        Callback::Async(f) => {
            let call = AssertUnwindSafe(async { f(event.clone()).await });
            match call.catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(panic_message(panic).into()),
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("callback panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("callback panicked: {}", s)
    } else {
        "callback panicked".to_string()
    }
}
