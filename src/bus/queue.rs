//! Async event bus for conversation lifecycle notifications.
//!
//! Uses one `tokio::sync::mpsc::unbounded_channel` per subscription so that
//! emitting never blocks the conversation loop, and a per-subscription
//! dispatch task so handlers for one subscription run strictly in emit order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::bus::events::{Event, EventKind};

/// Callback type for event subscribers.
///
/// Each callback receives an [`Event`] and returns a pinned future that
/// resolves to `()`.
pub type EventHandler =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async event bus that decouples the conversation loop from its observers.
///
/// The loop emits events as it progresses; subscribers register a callback
/// for one [`EventKind`] and receive matching events in emission order. The
/// bus can be cloned cheaply because all internal state is behind `Arc`.
#[derive(Clone)]
pub struct EventBus {
    /// Subscriber send halves keyed by event kind.
    subscribers: Arc<Mutex<HashMap<EventKind, Vec<UnboundedSender<Event>>>>>,
}

impl EventBus {
    /// Create a new `EventBus` with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to events of one kind.
    ///
    /// Spawns a dispatch task that invokes `handler` for each matching event,
    /// one at a time, in the order they were emitted. The task stops when
    /// `token` is cancelled; events still queued at that point are dropped,
    /// so a cancelled subscriber never sees another delivery.
    pub async fn subscribe(&self, kind: EventKind, token: CancellationToken, handler: EventHandler) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        {
            let mut subs = self.subscribers.lock().await;
            subs.entry(kind).or_insert_with(Vec::new).push(tx);
        }

        tokio::spawn(async move {
            loop {
                // `biased` polls the token first, so cancellation wins over
                // any queued event.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    ev = rx.recv() => {
                        let Some(ev) = ev else { break };
                        let fut = handler(ev);
                        if let Err(e) = tokio::spawn(fut).await {
                            error!("Subscriber for {:?} failed: {}", kind, e);
                        }
                    }
                }
            }
        });
    }

    /// Emit an event to every live subscriber of its kind.
    ///
    /// Never blocks on handlers; delivery happens on the subscribers' own
    /// dispatch tasks. Subscribers whose dispatch task has exited are pruned.
    pub async fn emit(&self, event: Event) {
        let mut subs = self.subscribers.lock().await;
        if let Some(senders) = subs.get_mut(&event.kind()) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of registered send halves for a kind, including ones whose
    /// dispatch task has exited but that no emit has pruned yet.
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        let subs = self.subscribers.lock().await;
        subs.get(&kind).map_or(0, |v| v.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Handler that appends `Reply` text to a shared buffer.
    fn capture_replies(buf: Arc<Mutex<Vec<String>>>) -> EventHandler {
        Arc::new(move |ev: Event| {
            let buf = buf.clone();
            Box::pin(async move {
                if let Event::Reply { text } = ev {
                    buf.lock().await.push(text);
                }
            })
        })
    }

    #[tokio::test]
    async fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let token = CancellationToken::new();

        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(received.clone()))
            .await;
        bus.emit(Event::Reply {
            text: "dispatched!".into(),
        })
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = received.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], "dispatched!");
    }

    #[tokio::test]
    async fn test_delivery_preserves_emit_order() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let token = CancellationToken::new();

        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(received.clone()))
            .await;
        for text in ["Hello", ", ", "world"] {
            bus.emit(Event::Reply { text: text.into() }).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;

        let messages = received.lock().await;
        assert_eq!(messages.join(""), "Hello, world");
    }

    #[tokio::test]
    async fn test_kind_filtering() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let token = CancellationToken::new();

        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(received.clone()))
            .await;
        bus.emit(Event::Error {
            message: "not for this subscriber".into(),
        })
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(received.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_delivery_after_cancel() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let token = CancellationToken::new();

        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(received.clone()))
            .await;
        bus.emit(Event::Reply { text: "one".into() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();
        bus.emit(Event::Reply { text: "two".into() }).await;
        bus.emit(Event::Reply { text: "three".into() }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let messages = received.lock().await;
        assert_eq!(messages.as_slice(), ["one"]);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_same_kind() {
        let bus = EventBus::new();
        let first = Arc::new(Mutex::new(Vec::<String>::new()));
        let second = Arc::new(Mutex::new(Vec::<String>::new()));
        let token = CancellationToken::new();

        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(first.clone()))
            .await;
        bus.subscribe(EventKind::Reply, token.clone(), capture_replies(second.clone()))
            .await;
        bus.emit(Event::Reply { text: "both".into() }).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.lock().await.len(), 1);
        assert_eq!(second.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_panic_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::<String>::new()));
        let received_clone = received.clone();
        let token = CancellationToken::new();

        let handler: EventHandler = Arc::new(move |ev: Event| {
            let buf = received_clone.clone();
            Box::pin(async move {
                if let Event::Reply { text } = ev {
                    if text == "boom" {
                        panic!("handler exploded");
                    }
                    buf.lock().await.push(text);
                }
            })
        });

        bus.subscribe(EventKind::Reply, token.clone(), handler).await;
        bus.emit(Event::Reply { text: "boom".into() }).await;
        bus.emit(Event::Reply {
            text: "survived".into(),
        })
        .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let messages = received.lock().await;
        assert_eq!(messages.as_slice(), ["survived"]);
    }

    #[tokio::test]
    async fn test_emit_prunes_dead_subscribers() {
        let bus = EventBus::new();
        let token = CancellationToken::new();
        bus.subscribe(EventKind::Done, token.clone(), Arc::new(|_| Box::pin(async {})))
            .await;
        assert_eq!(bus.subscriber_count(EventKind::Done).await, 1);

        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First emit after the dispatch task exits drops the dead sender.
        bus.emit(Event::Done {
            usage: Default::default(),
        })
        .await;
        assert_eq!(bus.subscriber_count(EventKind::Done).await, 0);
    }
}
