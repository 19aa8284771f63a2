//! Group metadata and the `registry.json`/`group.yaml` persistence spec §6
//! assigns to the daemon rather than the ledger (group CRUD is not itself
//! a ledger event stream — `group.create`/`group.update` events exist for
//! audit, but the current-state source of truth is this file).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use cccc_actors::Actor;
use cccc_core::group::GroupState;
use cccc_core::home::RuntimeHome;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DaemonError, Result};

/// A filesystem root the group's actors can be pointed at, plus an
/// optional git remote and display label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub scope_key: String,
    pub root: PathBuf,
    #[serde(default)]
    pub git_remote: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Per-group metadata, including actor *definitions* (not lifecycle state —
/// that lives in the in-memory `ActorSupervisor`, rebuilt from this list at
/// startup). The runtime home layout (spec §6) names no separate actors
/// file, so actor definitions ride along with the group's own metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMeta {
    pub group_id: String,
    pub title: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub state: GroupState,
    /// Desired run flag, authoritative across daemon restarts (spec §4.2,
    /// §5 startup recovery) — distinct from `state`, which only gates
    /// delivery/automation within an already-open runtime.
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub active_scope_key: Option<String>,
    #[serde(default)]
    pub actors: Vec<Actor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupMeta {
    /// The active scope's filesystem root, if one is set (spec §4.4:
    /// actor start fails with `missing_project_root` when unset).
    pub fn project_root(&self) -> Option<&std::path::Path> {
        let key = self.active_scope_key.as_deref()?;
        self.scopes.iter().find(|s| s.scope_key == key).map(|s| s.root.as_path())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(default)]
    group_ids: Vec<String>,
}

/// In-memory index over every known group plus the on-disk files backing
/// it. One instance is shared (behind `Arc`) by the daemon, the IPC
/// handler, and every `GroupStateHandle`.
pub struct GroupRegistry {
    home: RuntimeHome,
    groups: RwLock<HashMap<String, GroupMeta>>,
}

impl GroupRegistry {
    /// Load `registry.json` and every listed group's `group.yaml` (spec §6).
    pub fn open(home: RuntimeHome) -> Result<Self> {
        home.ensure_root_dirs()?;
        let index = read_index(&home.registry_json())?;
        let mut groups = HashMap::new();
        for group_id in &index.group_ids {
            match read_group_yaml(&home, group_id) {
                Ok(meta) => {
                    groups.insert(group_id.clone(), meta);
                }
                Err(e) => {
                    tracing::warn!(group_id, error = %e, "failed to load group.yaml, skipping");
                }
            }
        }
        Ok(Self {
            home,
            groups: RwLock::new(groups),
        })
    }

    pub fn home(&self) -> &RuntimeHome {
        &self.home
    }

    pub fn get(&self, group_id: &str) -> Option<GroupMeta> {
        self.groups.read().unwrap().get(group_id).cloned()
    }

    pub fn list(&self) -> Vec<GroupMeta> {
        let mut groups: Vec<GroupMeta> = self.groups.read().unwrap().values().cloned().collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        groups
    }

    pub fn create(&self, group_id: &str, title: &str, topic: Option<String>) -> Result<GroupMeta> {
        if self.groups.read().unwrap().contains_key(group_id) {
            return Err(DaemonError::GroupExists(group_id.to_string()));
        }
        let now = Utc::now();
        let meta = GroupMeta {
            group_id: group_id.to_string(),
            title: title.to_string(),
            topic,
            state: GroupState::Active,
            running: false,
            scopes: Vec::new(),
            active_scope_key: None,
            actors: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.home.ensure_group_dirs(group_id)?;
        self.persist_group(&meta)?;
        self.groups.write().unwrap().insert(group_id.to_string(), meta.clone());
        self.persist_index()?;
        info!(group_id, "group created");
        Ok(meta)
    }

    pub fn update(&self, group_id: &str, f: impl FnOnce(&mut GroupMeta)) -> Result<GroupMeta> {
        let mut groups = self.groups.write().unwrap();
        let meta = groups
            .get_mut(group_id)
            .ok_or_else(|| DaemonError::GroupNotFound(group_id.to_string()))?;
        f(meta);
        meta.updated_at = Utc::now();
        let snapshot = meta.clone();
        drop(groups);
        self.persist_group(&snapshot)?;
        Ok(snapshot)
    }

    pub fn set_state(&self, group_id: &str, state: GroupState) -> Result<GroupMeta> {
        self.update(group_id, |m| m.state = state)
    }

    pub fn delete(&self, group_id: &str) -> Result<()> {
        let mut groups = self.groups.write().unwrap();
        if groups.remove(group_id).is_none() {
            return Err(DaemonError::GroupNotFound(group_id.to_string()));
        }
        drop(groups);
        self.persist_index()?;
        info!(group_id, "group removed from registry");
        Ok(())
    }

    fn persist_group(&self, meta: &GroupMeta) -> Result<()> {
        let path = self.home.group_yaml(&meta.group_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, serde_yaml::to_string(meta)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn persist_index(&self) -> Result<()> {
        let mut group_ids: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        group_ids.sort();
        let index = RegistryIndex { group_ids };
        let path = self.home.registry_json();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&index)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_index(path: &std::path::Path) -> Result<RegistryIndex> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryIndex::default()),
        Err(e) => Err(e.into()),
    }
}

fn read_group_yaml(home: &RuntimeHome, group_id: &str) -> Result<GroupMeta> {
    let bytes = std::fs::read(home.group_yaml(group_id))?;
    Ok(serde_yaml::from_slice(&bytes)?)
}

/// Read-only [`cccc_core::GroupStateSource`] view of one group's current
/// state, handed to C5/C6 without exposing the rest of the registry.
pub struct GroupStateHandle {
    registry: Arc<GroupRegistry>,
    group_id: String,
}

impl GroupStateHandle {
    pub fn new(registry: Arc<GroupRegistry>, group_id: impl Into<String>) -> Self {
        Self {
            registry,
            group_id: group_id.into(),
        }
    }
}

impl cccc_core::GroupStateSource for GroupStateHandle {
    fn group_state(&self) -> GroupState {
        self.registry
            .get(&self.group_id)
            .map(|m| m.state)
            .unwrap_or(GroupState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        {
            let registry = GroupRegistry::open(home.clone()).unwrap();
            registry.create("g1", "Group One", None).unwrap();
            registry.set_state("g1", GroupState::Paused).unwrap();
        }
        let reopened = GroupRegistry::open(home).unwrap();
        let meta = reopened.get("g1").unwrap();
        assert_eq!(meta.title, "Group One");
        assert_eq!(meta.state, GroupState::Paused);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        let registry = GroupRegistry::open(home).unwrap();
        registry.create("g1", "Group One", None).unwrap();
        assert!(matches!(registry.create("g1", "dup", None), Err(DaemonError::GroupExists(_))));
    }
}
