//! Group activity state shared by delivery (C5) and automation (C6).
//!
//! Group CRUD and persistence are a daemon concern; this crate only
//! carries the enum and the read-only accessor both components poll.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Active,
    Idle,
    Paused,
}

impl Default for GroupState {
    fn default() -> Self {
        GroupState::Active
    }
}

/// Read-only view of a group's current activity state, implemented by the
/// daemon's group registry (spec §4.5, §4.6: `paused` suppresses delivery
/// entirely, `idle` suppresses automation but not direct chat).
pub trait GroupStateSource: Send + Sync {
    fn group_state(&self) -> GroupState;
}
