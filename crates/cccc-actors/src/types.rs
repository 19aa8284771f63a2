//! Actor record and lifecycle state machine (spec §3, §4.4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Foreman,
    Peer,
}

impl From<ActorRole> for cccc_users::ActorRole {
    fn from(role: ActorRole) -> Self {
        match role {
            ActorRole::Foreman => cccc_users::ActorRole::Foreman,
            ActorRole::Peer => cccc_users::ActorRole::Peer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Pty,
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Exiting,
}

impl LifecycleState {
    /// The transition table in spec §4.4's diagram. `crash` is handled
    /// out-of-band by the reaper rather than as a requested transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Stopped, LifecycleState::Starting)
                | (LifecycleState::Starting, LifecycleState::Running)
                | (LifecycleState::Running, LifecycleState::Exiting)
                | (LifecycleState::Exiting, LifecycleState::Stopped)
                // A starting process that fails to spawn returns to stopped.
                | (LifecycleState::Starting, LifecycleState::Stopped)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: String,
    pub title: String,
    pub role: ActorRole,
    pub runner: RunnerKind,
    pub runtime: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Keys only — values live in the local secret store, never the ledger.
    #[serde(default)]
    pub env_private_keys: Vec<String>,
    pub default_scope_key: String,
    pub enabled: bool,
    #[serde(default)]
    pub state: LifecycleState,
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Stopped
    }
}

impl Actor {
    /// Digest of argv, used by the pidfile to detect a config change across
    /// a daemon restart (spec §4.4 "re-attach only if argv_hash matches").
    pub fn argv_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for arg in &self.command {
            hasher.update(arg.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_hash_changes_with_command() {
        let mut a = Actor {
            actor_id: "A".into(),
            title: "A".into(),
            role: ActorRole::Peer,
            runner: RunnerKind::Headless,
            runtime: "shell".into(),
            command: vec!["echo".into(), "hi".into()],
            env: HashMap::new(),
            env_private_keys: vec![],
            default_scope_key: "".into(),
            enabled: true,
            state: LifecycleState::Stopped,
        };
        let h1 = a.argv_hash();
        a.command.push("again".into());
        assert_ne!(h1, a.argv_hash());
    }

    #[test]
    fn lifecycle_transitions_follow_the_diagram() {
        use LifecycleState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Exiting));
        assert!(Exiting.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }
}
