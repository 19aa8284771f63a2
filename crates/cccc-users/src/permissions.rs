//! Kernel-enforced RBAC rules for actor lifecycle state changes (spec §4.4).
//!
//! This is deliberately narrow: the full user-profile permission model
//! (capability flags, daily token budgets, admin approval queues) is a port
//! concern and out of scope here. Only the handful of rules the kernel
//! itself must enforce on `actor_*` state changes live in this checker,
//! following the single-purpose `PermissionChecker::check` shape.

use cccc_core::principal::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorAction {
    Add,
    Start,
    Stop,
    Restart,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Foreman,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    Denied { reason: String },
}

impl PermissionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionCheck::Allowed)
    }
}

pub struct PermissionChecker;

impl PermissionChecker {
    /// Evaluate whether `by` may perform `action` against `target_actor_id`
    /// (spec §4.4: "Permissions enforced here, not the port layer").
    ///
    /// `foreman_id` is the group's current foreman, if one exists — `None`
    /// only before the first actor is ever added.
    pub fn check_actor_action(
        by: &Principal,
        action: ActorAction,
        target_actor_id: &str,
        target_role: ActorRole,
        foreman_id: Option<&str>,
    ) -> PermissionCheck {
        let actor_id = match by {
            Principal::User => return PermissionCheck::Allowed,
            Principal::Actor(id) => id.as_str(),
            Principal::System | Principal::Svc(_) => {
                return PermissionCheck::Denied {
                    reason: "actor lifecycle changes require user or actor principal".into(),
                }
            }
        };

        let is_foreman = foreman_id == Some(actor_id);
        let is_self = actor_id == target_actor_id;

        match action {
            ActorAction::Add => {
                if is_foreman {
                    PermissionCheck::Allowed
                } else {
                    PermissionCheck::Denied {
                        reason: "actor_add requires user or foreman".into(),
                    }
                }
            }
            ActorAction::Start | ActorAction::Stop | ActorAction::Restart => {
                if is_foreman || is_self {
                    PermissionCheck::Allowed
                } else {
                    PermissionCheck::Denied {
                        reason: "actor_start/stop/restart requires user, foreman, or the actor itself".into(),
                    }
                }
            }
            ActorAction::Remove => {
                if is_self {
                    PermissionCheck::Allowed
                } else if is_foreman && target_role != ActorRole::Foreman {
                    PermissionCheck::Allowed
                } else {
                    PermissionCheck::Denied {
                        reason: "actor_remove requires self, user, or foreman acting on a non-foreman"
                            .into(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_bypasses_every_check() {
        for action in [
            ActorAction::Add,
            ActorAction::Start,
            ActorAction::Stop,
            ActorAction::Restart,
            ActorAction::Remove,
        ] {
            let check =
                PermissionChecker::check_actor_action(&Principal::User, action, "A", ActorRole::Peer, None);
            assert!(check.is_allowed());
        }
    }

    #[test]
    fn peer_cannot_add_actors() {
        let check = PermissionChecker::check_actor_action(
            &Principal::Actor("peer-1".into()),
            ActorAction::Add,
            "new-actor",
            ActorRole::Peer,
            Some("foreman-1"),
        );
        assert!(!check.is_allowed());
    }

    #[test]
    fn foreman_can_add_and_remove_peers() {
        let by = Principal::Actor("foreman-1".into());
        assert!(
            PermissionChecker::check_actor_action(&by, ActorAction::Add, "new", ActorRole::Peer, Some("foreman-1"))
                .is_allowed()
        );
        assert!(PermissionChecker::check_actor_action(
            &by,
            ActorAction::Remove,
            "peer-1",
            ActorRole::Peer,
            Some("foreman-1")
        )
        .is_allowed());
    }

    #[test]
    fn foreman_cannot_remove_another_foreman() {
        let by = Principal::Actor("foreman-1".into());
        let check = PermissionChecker::check_actor_action(
            &by,
            ActorAction::Remove,
            "foreman-2",
            ActorRole::Foreman,
            Some("foreman-1"),
        );
        assert!(!check.is_allowed());
    }

    #[test]
    fn any_actor_can_stop_itself() {
        let by = Principal::Actor("peer-1".into());
        let check =
            PermissionChecker::check_actor_action(&by, ActorAction::Stop, "peer-1", ActorRole::Peer, Some("foreman-1"));
        assert!(check.is_allowed());
    }

    #[test]
    fn peer_cannot_stop_another_peer() {
        let by = Principal::Actor("peer-1".into());
        let check = PermissionChecker::check_actor_action(
            &by,
            ActorAction::Stop,
            "peer-2",
            ActorRole::Peer,
            Some("foreman-1"),
        );
        assert!(!check.is_allowed());
    }
}
