//! On-disk shapes for `cursors.json` and `attention.json` (spec §4.3, §6).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCursor {
    pub last_read_event_id: String,
    pub last_read_ts: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorsFile {
    #[serde(default)]
    pub cursors: HashMap<String, ReadCursor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttentionFile {
    /// actor_id -> open attention event ids, insertion order preserved for
    /// stable `inbox_list` output.
    #[serde(default)]
    pub open: HashMap<String, Vec<String>>,
    /// actor_id -> event ids already acked, kept to distinguish "already
    /// acked" (idempotent replay) from "never a valid attention target"
    /// (rejected) once an id leaves `open`.
    #[serde(default)]
    pub acked: HashMap<String, HashSet<String>>,
}

impl AttentionFile {
    pub fn is_open(&self, actor_id: &str, event_id: &str) -> bool {
        self.open
            .get(actor_id)
            .map(|ids| ids.iter().any(|id| id == event_id))
            .unwrap_or(false)
    }

    pub fn is_acked(&self, actor_id: &str, event_id: &str) -> bool {
        self.acked
            .get(actor_id)
            .map(|ids| ids.contains(event_id))
            .unwrap_or(false)
    }

    pub fn insert(&mut self, actor_id: &str, event_id: &str) {
        if self.is_acked(actor_id, event_id) {
            return;
        }
        let ids = self.open.entry(actor_id.to_string()).or_default();
        if !ids.iter().any(|id| id == event_id) {
            ids.push(event_id.to_string());
        }
    }

    pub fn clear(&mut self, actor_id: &str, event_id: &str) {
        if let Some(ids) = self.open.get_mut(actor_id) {
            ids.retain(|id| id != event_id);
        }
        self.acked
            .entry(actor_id.to_string())
            .or_default()
            .insert(event_id.to_string());
    }

    pub fn as_set(&self, actor_id: &str) -> HashSet<&str> {
        self.open
            .get(actor_id)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
