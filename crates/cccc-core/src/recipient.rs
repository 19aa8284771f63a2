//! Recipient token grammar and resolution (spec §4.1).
//!
//! Normalization runs once, before a `chat.message` is appended, and its
//! output is what gets stored (invariant I4). Resolution runs on every
//! delivery attempt against the *current* actor registry and is never
//! persisted.

use crate::error::{CcccError, Result};

const SELECTORS: [&str; 4] = ["all", "peers", "foreman", "user"];

/// Read-only view over the current actor registry, implemented by the
/// actor supervisor. Kept here (rather than depending on `cccc-actors`) so
/// both the supervisor and the delivery pipeline can share one resolution
/// algorithm without a crate cycle.
pub trait ActorDirectory {
    /// All enabled actor ids, in no particular order.
    fn actor_ids(&self) -> Vec<String>;
    /// True if `actor_id` is a known actor (enabled or not).
    fn exists(&self, actor_id: &str) -> bool;
    /// Case-insensitive unique title lookup. `None` if zero or >1 matches.
    fn resolve_title(&self, title: &str) -> Option<String>;
    /// The current foreman's actor id, if one is elected.
    fn foreman_id(&self) -> Option<String>;
    /// True if `actor_id` is currently in the `running` lifecycle state.
    fn is_running(&self, actor_id: &str) -> bool;
}

/// Parse and normalize raw `to[]` tokens before append (spec §4.1).
///
/// - Titles are resolved to ids.
/// - `@x` selectors are lowercased and validated against the known set.
/// - The literal `user` is kept as-is (it is already the canonical form).
/// - Duplicates are removed, preserving first-seen order.
/// - Unknown `@x` selectors and unresolvable titles are rejected.
pub fn normalize(tokens: &[String], dir: &dyn ActorDirectory) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for raw in tokens {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let canonical = if let Some(rest) = token.strip_prefix('@') {
            let lower = rest.to_lowercase();
            if !SELECTORS.contains(&lower.as_str()) {
                return Err(CcccError::InvalidRequest(format!(
                    "unknown recipient selector '@{lower}'"
                )));
            }
            format!("@{lower}")
        } else if token == "user" {
            "user".to_string()
        } else if dir.exists(token) {
            token.to_string()
        } else if let Some(id) = dir.resolve_title(token) {
            id
        } else {
            return Err(CcccError::InvalidRequest(format!(
                "unknown recipient '{token}'"
            )));
        };

        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }
    Ok(out)
}

/// The concrete delivery targets for a normalized `to[]` list, resolved
/// against the registry at delivery time (spec §4.1, §4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRecipients {
    pub actor_ids: Vec<String>,
    pub to_user: bool,
}

/// Expand selectors against the current registry, excluding `sender` (an
/// actor never addresses itself via a broadcast selector).
///
/// Empty `to[]` is broadcast, equivalent to `@all` plus `user` (spec §4.1).
pub fn resolve(
    normalized: &[String],
    dir: &dyn ActorDirectory,
    sender: Option<&str>,
) -> ResolvedRecipients {
    let tokens: Vec<String> = if normalized.is_empty() {
        vec!["@all".to_string(), "user".to_string()]
    } else {
        normalized.to_vec()
    };

    let mut actor_ids: Vec<String> = Vec::new();
    let mut to_user = false;

    let mut push_actor = |id: String| {
        if Some(id.as_str()) != sender && !actor_ids.contains(&id) {
            actor_ids.push(id);
        }
    };

    for token in &tokens {
        match token.as_str() {
            "user" => to_user = true,
            "@user" => to_user = true,
            "@all" => {
                for id in dir.actor_ids() {
                    push_actor(id);
                }
            }
            "@peers" => {
                let foreman = dir.foreman_id();
                for id in dir.actor_ids() {
                    if Some(&id) != foreman.as_ref() {
                        push_actor(id);
                    }
                }
            }
            "@foreman" => {
                if let Some(id) = dir.foreman_id() {
                    push_actor(id);
                }
            }
            id => {
                if dir.exists(id) {
                    push_actor(id.to_string());
                }
            }
        }
    }

    ResolvedRecipients { actor_ids, to_user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeDirectory {
        actors: HashMap<String, String>, // id -> title
        foreman: Option<String>,
        running: Vec<String>,
    }

    impl ActorDirectory for FakeDirectory {
        fn actor_ids(&self) -> Vec<String> {
            self.actors.keys().cloned().collect()
        }
        fn exists(&self, actor_id: &str) -> bool {
            self.actors.contains_key(actor_id)
        }
        fn resolve_title(&self, title: &str) -> Option<String> {
            let matches: Vec<&String> = self
                .actors
                .iter()
                .filter(|(_, t)| t.eq_ignore_ascii_case(title))
                .map(|(id, _)| id)
                .collect();
            if matches.len() == 1 {
                Some(matches[0].clone())
            } else {
                None
            }
        }
        fn foreman_id(&self) -> Option<String> {
            self.foreman.clone()
        }
        fn is_running(&self, actor_id: &str) -> bool {
            self.running.contains(&actor_id.to_string())
        }
    }

    fn fixture() -> FakeDirectory {
        let mut actors = HashMap::new();
        actors.insert("F1".to_string(), "Foreman".to_string());
        actors.insert("P1".to_string(), "Peer One".to_string());
        FakeDirectory {
            actors,
            foreman: Some("F1".to_string()),
            running: vec!["F1".to_string(), "P1".to_string()],
        }
    }

    #[test]
    fn normalize_resolves_titles_and_dedupes() {
        let dir = fixture();
        let out = normalize(
            &["Foreman".to_string(), "F1".to_string(), "@User".to_string()],
            &dir,
        )
        .unwrap();
        assert_eq!(out, vec!["F1".to_string(), "@user".to_string()]);
    }

    #[test]
    fn normalize_rejects_unknown_selector() {
        let dir = fixture();
        let err = normalize(&["@nope".to_string()], &dir).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn empty_to_resolves_to_broadcast() {
        let dir = fixture();
        let resolved = resolve(&[], &dir, None);
        assert!(resolved.to_user);
        assert_eq!(resolved.actor_ids.len(), 2);
    }

    #[test]
    fn peers_excludes_foreman_and_sender() {
        let dir = fixture();
        let resolved = resolve(&["@peers".to_string()], &dir, None);
        assert_eq!(resolved.actor_ids, vec!["P1".to_string()]);
    }

    #[test]
    fn sender_never_addresses_itself_via_broadcast() {
        let dir = fixture();
        let resolved = resolve(&["@all".to_string()], &dir, Some("P1"));
        assert_eq!(resolved.actor_ids, vec!["F1".to_string()]);
    }
}
