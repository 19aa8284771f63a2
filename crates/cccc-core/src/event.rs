use serde::{Deserialize, Serialize};
use std::fmt;

use crate::principal::Principal;

/// Dotted-namespace event kind. Known kinds get a named variant; anything
/// else round-trips through `Other` so forward-compatible readers never
/// choke on a kind they don't recognize yet (spec §9, "Dynamic event
/// dispatch via string `kind`").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventKind {
    ChatMessage,
    ChatAck,
    ChatRead,
    SystemNotify,
    SystemNotifyAck,
    GroupCreate,
    GroupUpdate,
    GroupDelete,
    GroupStateChanged,
    ActorAdd,
    ActorUpdate,
    ActorRemove,
    ActorStart,
    ActorStop,
    ActorRestart,
    ActorExit,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ChatMessage => "chat.message",
            EventKind::ChatAck => "chat.ack",
            EventKind::ChatRead => "chat.read",
            EventKind::SystemNotify => "system.notify",
            EventKind::SystemNotifyAck => "system.notify_ack",
            EventKind::GroupCreate => "group.create",
            EventKind::GroupUpdate => "group.update",
            EventKind::GroupDelete => "group.delete",
            EventKind::GroupStateChanged => "group.state_changed",
            EventKind::ActorAdd => "actor.add",
            EventKind::ActorUpdate => "actor.update",
            EventKind::ActorRemove => "actor.remove",
            EventKind::ActorStart => "actor.start",
            EventKind::ActorStop => "actor.stop",
            EventKind::ActorRestart => "actor.restart",
            EventKind::ActorExit => "actor.exit",
            EventKind::Other(s) => s,
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, EventKind::ChatMessage)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for EventKind {
    type Error = std::convert::Infallible;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(match s.as_str() {
            "chat.message" => EventKind::ChatMessage,
            "chat.ack" => EventKind::ChatAck,
            "chat.read" => EventKind::ChatRead,
            "system.notify" => EventKind::SystemNotify,
            "system.notify_ack" => EventKind::SystemNotifyAck,
            "group.create" => EventKind::GroupCreate,
            "group.update" => EventKind::GroupUpdate,
            "group.delete" => EventKind::GroupDelete,
            "group.state_changed" => EventKind::GroupStateChanged,
            "actor.add" => EventKind::ActorAdd,
            "actor.update" => EventKind::ActorUpdate,
            "actor.remove" => EventKind::ActorRemove,
            "actor.start" => EventKind::ActorStart,
            "actor.stop" => EventKind::ActorStop,
            "actor.restart" => EventKind::ActorRestart,
            "actor.exit" => EventKind::ActorExit,
            _ => EventKind::Other(s),
        })
    }
}

impl From<EventKind> for String {
    fn from(k: EventKind) -> Self {
        k.as_str().to_string()
    }
}

/// The fixed outer envelope shape `{v,id,ts,kind,group_id,scope_key,by,data}`
/// (spec §3, GLOSSARY). Immutable once appended (invariant I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub v: u32,
    pub id: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub kind: EventKind,
    pub group_id: String,
    #[serde(default)]
    pub scope_key: String,
    pub by: Principal,
    pub data: serde_json::Value,
}

/// A not-yet-appended event: `id`/`ts`/`seq` are assigned by the ledger on
/// append (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPartial {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: EventKind,
    pub group_id: String,
    #[serde(default)]
    pub scope_key: String,
    pub by: Principal,
    pub data: serde_json::Value,
}

impl Event {
    /// Deserialize `self.data` into a typed payload.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Serialized line length, used against `MAX_EVENT_BYTES` (invariant I7).
    pub fn serialized_len(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// `data` payload of a `chat.message` event (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_text: Option<String>,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_to: Option<Vec<String>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatMessageData {
    /// I5: relay provenance fields must both be set or both absent.
    pub fn provenance_consistent(&self) -> bool {
        self.src_group_id.is_some() == self.src_event_id.is_some()
    }

    /// text non-empty OR attachments present (spec §4.5 step 1).
    pub fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    Plain,
    Markdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    #[default]
    Normal,
    Attention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub mime_type: String,
}

/// `data` payload of a `chat.ack` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAckData {
    pub actor_id: String,
    pub event_id: String,
}

/// `data` payload of a `chat.read` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReadData {
    pub actor_id: String,
    pub event_id: String,
}

/// `data` payload of a `system.notify` event (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemNotifyData {
    pub notify_kind: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub requires_ack: bool,
}

/// `data` payload of a `system.notify_ack` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemNotifyAckData {
    pub actor_id: String,
    pub notify_event_id: String,
}

/// `data` payload of `actor.start`/`stop`/`restart`/`exit` lifecycle events
/// (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorLifecycleData {
    pub actor_id: String,
    pub cause: LifecycleCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleCause {
    User,
    Crash,
    ConfigChange,
    GroupStop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_known_and_unknown() {
        for s in ["chat.message", "actor.exit", "group.custom_extension"] {
            let k: EventKind = s.to_string().try_into().unwrap();
            assert_eq!(k.as_str(), s);
        }
    }

    #[test]
    fn provenance_requires_both_or_neither() {
        let mut d = ChatMessageData {
            text: "hi".into(),
            format: MessageFormat::Plain,
            to: vec![],
            reply_to: None,
            quote_text: None,
            priority: MessagePriority::Normal,
            src_group_id: None,
            src_event_id: None,
            dst_group_id: None,
            dst_to: None,
            attachments: vec![],
            client_id: None,
        };
        assert!(d.provenance_consistent());
        d.src_group_id = Some("gA".into());
        assert!(!d.provenance_consistent());
        d.src_event_id = Some("e1".into());
        assert!(d.provenance_consistent());
    }
}
