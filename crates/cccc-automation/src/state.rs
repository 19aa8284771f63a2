//! In-memory per-actor bookkeeping for the automation policies (spec §4.6).
//!
//! Unlike the ledger, inbox cursors, and attention set, none of this is
//! durable — a daemon restart simply starts every counter fresh, which is
//! harmless since these are pacing heuristics, not correctness state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Default, Clone)]
pub struct ActorAutomationState {
    pub last_nudge_at: Option<DateTime<Utc>>,
    pub last_actor_idle_notify_at: Option<DateTime<Utc>>,
    pub handoffs_since_self_check: u32,
    pub self_checks_since_refresh: u32,
    pub messages_since_attention_ack: u32,
    pub keepalive_count: u32,
    pub last_keepalive_at: Option<DateTime<Utc>>,
    pub last_counted_event_id: Option<String>,
    pub last_help_nudge_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct AutomationState {
    pub last_chat_message_at: Option<DateTime<Utc>>,
    pub last_silence_notify_at: Option<DateTime<Utc>>,
    actors: HashMap<String, ActorAutomationState>,
}

impl AutomationState {
    pub fn actor_mut(&mut self, actor_id: &str) -> &mut ActorAutomationState {
        self.actors.entry(actor_id.to_string()).or_default()
    }

    pub fn actor(&self, actor_id: &str) -> Option<&ActorAutomationState> {
        self.actors.get(actor_id)
    }
}
