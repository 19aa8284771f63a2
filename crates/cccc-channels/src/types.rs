//! Shapes crossing the IM bridge contract (spec §6: "bridges SHOULD keep a
//! per-chat subscription flag in their own state; the core only forwards
//! stream events and exposes send/reply for inbound messages").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cccc_core::event::EventKind;

/// A message received from an external platform, destined for `send`/`reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel name (e.g. "telegram", "discord").
    pub channel: String,
    /// Platform-native identifier for the sender (chat id, user id, ...).
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Full raw payload, for adapters that need platform-specific fields.
    pub raw_payload: Option<serde_json::Value>,
}

/// A message relayed out to an external platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(default)]
    pub format: MessageFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// A group's opt-in to relay events of certain kinds to one external chat.
/// Persisted under runtime home (spec §6), never as a ledger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub channel: String,
    pub chat_id: String,
    /// `None` means relay every kind the bridge contract forwards.
    #[serde(default)]
    pub kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    pub fn matches(&self, kind: &EventKind) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(kind),
            None => true,
        }
    }
}

/// On-disk shape of `state/channels.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFile {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}
