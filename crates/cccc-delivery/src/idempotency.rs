//! `client_id` de-duplication within a short rolling window (spec §4.5 step 1).

use std::collections::HashMap;
use std::sync::Mutex;

use cccc_core::config::IDEMPOTENCY_WINDOW_SECS;
use cccc_core::event::Event;
use cccc_core::principal::Principal;
use chrono::{DateTime, Utc};

/// Maps a (sender, client-supplied idempotency key) pair to the event it
/// produced, so a retried submission returns the original event instead of
/// appending a duplicate `chat.message`. Keyed by `by` as well as
/// `client_id` — two different principals are never deduplicated against
/// each other just because they picked the same client-generated id.
pub struct IdempotencyCache {
    seen: Mutex<HashMap<(Principal, String), (Event, DateTime<Utc>)>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// If `(by, client_id)` was seen within the window, return the event it
    /// already produced.
    pub fn lookup(&self, by: &Principal, client_id: &str) -> Option<Event> {
        let now = Utc::now();
        let mut guard = self.seen.lock().unwrap();
        guard.retain(|_, (_, seen_at)| now - *seen_at < chrono::Duration::seconds(IDEMPOTENCY_WINDOW_SECS));
        guard.get(&(by.clone(), client_id.to_string())).map(|(event, _)| event.clone())
    }

    pub fn record(&self, by: &Principal, client_id: &str, event: Event) {
        self.seen
            .lock()
            .unwrap()
            .insert((by.clone(), client_id.to_string()), (event, Utc::now()));
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cccc_core::event::EventKind;

    fn fake_event(id: &str) -> Event {
        Event {
            v: 1,
            id: id.to_string(),
            ts: Utc::now(),
            seq: Some(1),
            kind: EventKind::ChatMessage,
            group_id: "g1".to_string(),
            scope_key: String::new(),
            by: Principal::User,
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn replayed_client_id_returns_original_event() {
        let cache = IdempotencyCache::new();
        assert!(cache.lookup(&Principal::User, "c1").is_none());
        cache.record(&Principal::User, "c1", fake_event("e1"));
        assert_eq!(cache.lookup(&Principal::User, "c1").unwrap().id, "e1");
    }

    #[test]
    fn same_client_id_from_different_principals_does_not_collide() {
        let cache = IdempotencyCache::new();
        let actor = Principal::Actor("F1".to_string());
        cache.record(&Principal::User, "c1", fake_event("e1"));
        assert!(cache.lookup(&actor, "c1").is_none());
        cache.record(&actor, "c1", fake_event("e2"));
        assert_eq!(cache.lookup(&Principal::User, "c1").unwrap().id, "e1");
        assert_eq!(cache.lookup(&actor, "c1").unwrap().id, "e2");
    }
}
