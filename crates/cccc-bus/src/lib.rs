//! In-process event fan-out (spec §4.8, C8).
//!
//! Wired as a `cccc_ledger::LedgerObserver`: every successful append is
//! pushed here outside the writer lock, then fanned out to every matching
//! subscriber's bounded queue. A slow subscriber is closed rather than
//! allowed to apply backpressure to the ledger — it is expected to
//! reconnect and reconcile via `Ledger::tail`.

use std::sync::Mutex;

use cccc_core::event::{Event, EventKind};
use cccc_ledger::LedgerObserver;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-subscriber outbound queue depth before the subscriber is dropped.
const DEFAULT_QUEUE_DEPTH: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<Event>,
    kinds: Option<Vec<EventKind>>,
}

/// One group's event bus. The daemon owns one per open group.
pub struct EventBus {
    group_id: String,
    queue_depth: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// A live subscription handle; drop it (or let its sender close) to
/// unsubscribe.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl EventBus {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self::with_queue_depth(group_id, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(group_id: impl Into<String>, queue_depth: usize) -> Self {
        Self {
            group_id: group_id.into(),
            queue_depth,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every event (`kinds = None`) or a kinds allowlist, per
    /// the stream filter in spec §4.7.
    pub fn subscribe(&self, kinds: Option<Vec<EventKind>>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subscribers.lock().unwrap().push(Subscriber { tx, kinds });
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl LedgerObserver for EventBus {
    /// Non-blocking enqueue to every matching subscriber (spec §5 "bounded
    /// per-subscriber queue with non-blocking enqueue; overflow closes the
    /// subscriber").
    fn on_append(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|sub| {
            if let Some(kinds) = &sub.kinds {
                if !kinds.contains(&event.kind) {
                    return true;
                }
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(group_id = %self.group_id, event_id = %event.id, "subscriber queue full, closing");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        if subscribers.len() != before {
            debug!(group_id = %self.group_id, dropped = before - subscribers.len(), "closed slow or gone subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cccc_core::event::EventKind;
    use cccc_core::principal::Principal;
    use serde_json::json;

    fn fake_event(kind: EventKind) -> Event {
        Event {
            v: 1,
            id: "e1".into(),
            ts: chrono::Utc::now(),
            seq: Some(1),
            kind,
            group_id: "g1".into(),
            scope_key: String::new(),
            by: Principal::User,
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events() {
        let bus = EventBus::new("g1");
        let mut sub = bus.subscribe(Some(vec![EventKind::ChatMessage]));
        bus.on_append(&fake_event(EventKind::ChatMessage));
        bus.on_append(&fake_event(EventKind::ActorStart));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::ChatMessage);
    }

    #[tokio::test]
    async fn full_queue_closes_subscriber() {
        let bus = EventBus::with_queue_depth("g1", 1);
        let mut sub = bus.subscribe(None);
        bus.on_append(&fake_event(EventKind::ChatMessage));
        bus.on_append(&fake_event(EventKind::ChatMessage));
        assert_eq!(bus.subscriber_count(), 0);
        // The one event that fit in the queue is still deliverable.
        assert!(sub.recv().await.is_some());
    }
}
