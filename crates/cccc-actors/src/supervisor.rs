//! Per-group actor registry, lifecycle transitions, and foreman election
//! (spec §4.4, C4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cccc_core::event::{ActorLifecycleData, Event, EventKind, EventPartial, LifecycleCause};
use cccc_core::home::RuntimeHome;
use cccc_core::principal::Principal;
use cccc_core::recipient::ActorDirectory;
use cccc_ledger::Ledger;
use cccc_users::{ActorAction, PermissionChecker};
use tracing::{info, instrument, warn};

use crate::error::{ActorError, Result};
use crate::pidfile::PidRecord;
use crate::runner::{HeadlessRunner, PtyRunner, Runner, SpawnSpec};
use crate::types::{Actor, ActorRole, LifecycleState, RunnerKind};

struct Slot {
    actor: Actor,
    runner: Option<Box<dyn Runner>>,
}

pub struct ActorSupervisor {
    group_id: String,
    home: RuntimeHome,
    ledger: Arc<Ledger>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ActorSupervisor {
    pub fn new(home: RuntimeHome, group_id: impl Into<String>, ledger: Arc<Ledger>) -> Self {
        Self {
            group_id: group_id.into(),
            home,
            ledger,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, actor: Actor) {
        self.slots.lock().unwrap().insert(
            actor.actor_id.clone(),
            Slot {
                actor,
                runner: None,
            },
        );
    }

    pub fn get(&self, actor_id: &str) -> Option<Actor> {
        self.slots.lock().unwrap().get(actor_id).map(|s| s.actor.clone())
    }

    pub fn list(&self) -> Vec<Actor> {
        self.slots.lock().unwrap().values().map(|s| s.actor.clone()).collect()
    }

    fn foreman(&self) -> Option<String> {
        self.slots
            .lock()
            .unwrap()
            .values()
            .find(|s| s.actor.role == ActorRole::Foreman)
            .map(|s| s.actor.actor_id.clone())
    }

    #[instrument(skip(self, actor), fields(group_id = %self.group_id, actor_id = %actor.actor_id))]
    pub async fn add(&self, by: &Principal, actor: Actor) -> Result<Event> {
        let check = PermissionChecker::check_actor_action(
            by,
            ActorAction::Add,
            &actor.actor_id,
            cccc_users::ActorRole::Peer,
            self.foreman().as_deref(),
        );
        if !check.is_allowed() {
            return Err(ActorError::PermissionDenied(reason(check)));
        }
        let actor_id = actor.actor_id.clone();
        self.load(actor);
        let event = self.record_lifecycle(EventKind::ActorAdd, by, &actor_id, LifecycleCause::User).await?;
        self.recompute_foreman(by).await?;
        Ok(event)
    }

    #[instrument(skip(self), fields(group_id = %self.group_id, actor_id))]
    pub async fn remove(&self, by: &Principal, actor_id: &str) -> Result<Event> {
        let role = self
            .get(actor_id)
            .ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?
            .role;
        let check = PermissionChecker::check_actor_action(
            by,
            ActorAction::Remove,
            actor_id,
            role.into(),
            self.foreman().as_deref(),
        );
        if !check.is_allowed() {
            return Err(ActorError::PermissionDenied(reason(check)));
        }
        self.slots.lock().unwrap().remove(actor_id);
        let event = self
            .record_lifecycle(EventKind::ActorRemove, by, actor_id, LifecycleCause::User)
            .await?;
        self.recompute_foreman(by).await?;
        Ok(event)
    }

    /// Spawn the actor's process (spec §4.4 `stopped -> starting -> running`).
    #[instrument(skip(self, env_private), fields(group_id = %self.group_id, actor_id))]
    pub async fn start(
        &self,
        by: &Principal,
        actor_id: &str,
        project_root: Option<&Path>,
        env_private: &HashMap<String, String>,
        cause: LifecycleCause,
    ) -> Result<Event> {
        let actor = self
            .get(actor_id)
            .ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        let check = PermissionChecker::check_actor_action(
            by,
            ActorAction::Start,
            actor_id,
            actor.role.into(),
            self.foreman().as_deref(),
        );
        if !check.is_allowed() {
            return Err(ActorError::PermissionDenied(reason(check)));
        }

        let cwd = project_root
            .ok_or_else(|| ActorError::MissingProjectRoot(actor_id.to_string()))?
            .to_path_buf();

        self.transition(actor_id, LifecycleState::Starting)?;

        let mut env = actor.env.clone();
        env.extend(env_private.clone());

        let spawn_result = spawn_runner(&actor, &cwd, &env);
        let runner = match spawn_result {
            Ok(r) => r,
            Err(e) => {
                self.transition(actor_id, LifecycleState::Stopped)?;
                return Err(e);
            }
        };

        let pid = runner.pid();
        if let Some(pid) = pid {
            let record = PidRecord {
                pid,
                started_at: chrono::Utc::now(),
                argv_hash: actor.argv_hash(),
            };
            record.write(&self.home.pidfile(&self.group_id, actor_id))?;
        }

        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(actor_id) {
                slot.runner = Some(runner);
            }
        }
        self.transition(actor_id, LifecycleState::Running)?;
        self.record_lifecycle(EventKind::ActorStart, by, actor_id, cause).await
    }

    #[instrument(skip(self), fields(group_id = %self.group_id, actor_id))]
    pub async fn stop(&self, by: &Principal, actor_id: &str, cause: LifecycleCause) -> Result<Event> {
        let actor = self
            .get(actor_id)
            .ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        let check = PermissionChecker::check_actor_action(
            by,
            ActorAction::Stop,
            actor_id,
            actor.role.into(),
            self.foreman().as_deref(),
        );
        if !check.is_allowed() {
            return Err(ActorError::PermissionDenied(reason(check)));
        }

        self.transition(actor_id, LifecycleState::Exiting)?;
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(actor_id) {
                if let Some(runner) = slot.runner.take() {
                    runner.kill();
                }
            }
        }
        PidRecord::remove(&self.home.pidfile(&self.group_id, actor_id))?;
        self.transition(actor_id, LifecycleState::Stopped)?;
        self.record_lifecycle(EventKind::ActorStop, by, actor_id, cause).await
    }

    #[instrument(skip(self, project_root, env_private), fields(group_id = %self.group_id, actor_id))]
    pub async fn restart(
        &self,
        by: &Principal,
        actor_id: &str,
        project_root: Option<&Path>,
        env_private: &HashMap<String, String>,
    ) -> Result<Event> {
        let actor = self
            .get(actor_id)
            .ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        let check = PermissionChecker::check_actor_action(
            by,
            ActorAction::Restart,
            actor_id,
            actor.role.into(),
            self.foreman().as_deref(),
        );
        if !check.is_allowed() {
            return Err(ActorError::PermissionDenied(reason(check)));
        }
        if self.is_running(actor_id) {
            self.stop(by, actor_id, LifecycleCause::User).await?;
        }
        let event = self
            .start(by, actor_id, project_root, env_private, LifecycleCause::User)
            .await?;
        self.record_lifecycle(EventKind::ActorRestart, by, actor_id, LifecycleCause::User).await?;
        Ok(event)
    }

    /// Reap a process that exited on its own (spec §4.4 `running -> crash -> stopped`).
    #[instrument(skip(self), fields(group_id = %self.group_id, actor_id))]
    pub async fn reap_if_dead(&self, actor_id: &str) -> Result<Option<Event>> {
        let dead = {
            let slots = self.slots.lock().unwrap();
            match slots.get(actor_id).and_then(|s| s.runner.as_ref()) {
                Some(runner) => !runner.is_alive(),
                None => false,
            }
        };
        if !dead {
            return Ok(None);
        }
        warn!("actor process exited unexpectedly, reaping");
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(actor_id) {
                slot.runner = None;
            }
        }
        PidRecord::remove(&self.home.pidfile(&self.group_id, actor_id))?;
        self.transition(actor_id, LifecycleState::Stopped).ok();
        let event = self
            .record_lifecycle(EventKind::ActorExit, &Principal::System, actor_id, LifecycleCause::Crash)
            .await?;
        Ok(Some(event))
    }

    /// Scan pidfiles at startup: re-attach if the OS process is alive and
    /// its argv still matches, otherwise clean up (spec §4.4, C9).
    #[instrument(skip(self), fields(group_id = %self.group_id))]
    pub fn reconcile_pidfiles(&self) -> Result<()> {
        let actor_ids: Vec<String> = self.slots.lock().unwrap().keys().cloned().collect();
        for actor_id in actor_ids {
            let path = self.home.pidfile(&self.group_id, &actor_id);
            let Some(record) = PidRecord::read(&path)? else {
                continue;
            };
            let actor = self.get(&actor_id).expect("listed actor_id must exist");
            let alive = PidRecord::process_alive(record.pid);
            let matches = record.argv_hash == actor.argv_hash();
            if alive && matches {
                info!(pid = record.pid, "re-attaching to surviving actor process");
                self.transition(&actor_id, LifecycleState::Running).ok();
            } else {
                info!(pid = record.pid, alive, matches, "discarding stale pidfile");
                PidRecord::remove(&path)?;
                self.transition(&actor_id, LifecycleState::Stopped).ok();
            }
        }
        Ok(())
    }

    pub fn is_running(&self, actor_id: &str) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(actor_id)
            .map(|s| s.actor.state == LifecycleState::Running)
            .unwrap_or(false)
    }

    pub fn drain_output(&self, actor_id: &str) -> Result<String> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(actor_id).ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        match &slot.runner {
            Some(runner) => Ok(runner.drain_output()),
            None => Err(ActorError::NotRunning(actor_id.to_string())),
        }
    }

    pub fn inject(&self, actor_id: &str, payload: &[u8]) -> Result<()> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(actor_id).ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        match &slot.runner {
            Some(runner) => runner.write(payload),
            None => Err(ActorError::NotRunning(actor_id.to_string())),
        }
    }

    /// Timestamp of the actor's last output, or `None` if it has never run
    /// or has produced nothing yet (feeds the actor-idle automation policy).
    pub fn last_activity_at(&self, actor_id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.slots
            .lock()
            .unwrap()
            .get(actor_id)
            .and_then(|s| s.runner.as_ref())
            .and_then(|r| r.last_activity_at())
    }

    pub fn resize(&self, actor_id: &str, cols: u16, rows: u16) -> Result<()> {
        let slots = self.slots.lock().unwrap();
        let slot = slots.get(actor_id).ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        match &slot.runner {
            Some(runner) => runner.resize(cols, rows),
            None => Err(ActorError::NotRunning(actor_id.to_string())),
        }
    }

    pub fn supports_bracketed_paste(&self, actor_id: &str) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(actor_id)
            .and_then(|s| s.runner.as_ref())
            .map(|r| r.supports_bracketed_paste())
            .unwrap_or(false)
    }

    fn transition(&self, actor_id: &str, next: LifecycleState) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(actor_id).ok_or_else(|| ActorError::NotFound(actor_id.to_string()))?;
        if !slot.actor.state.can_transition_to(next) {
            return Err(ActorError::Invariant(format!(
                "actor {actor_id} cannot transition {:?} -> {:?}",
                slot.actor.state, next
            )));
        }
        slot.actor.state = next;
        Ok(())
    }

    async fn record_lifecycle(
        &self,
        kind: EventKind,
        by: &Principal,
        actor_id: &str,
        cause: LifecycleCause,
    ) -> Result<Event> {
        let data = ActorLifecycleData {
            actor_id: actor_id.to_string(),
            cause,
        };
        let partial = EventPartial {
            id: None,
            kind,
            group_id: self.group_id.clone(),
            scope_key: String::new(),
            by: by.clone(),
            data: serde_json::to_value(data)?,
        };
        Ok(self.ledger.append(partial).await?)
    }

    /// Recompute the foreman after an add/remove/role-change (spec §4.4).
    /// If no foreman exists and at least one enabled actor remains, promote
    /// the first enabled actor (ordering is insertion order of the map,
    /// which is not guaranteed — acceptable since "first enabled" only
    /// matters when no foreman has ever been elected).
    async fn recompute_foreman(&self, by: &Principal) -> Result<()> {
        if self.foreman().is_some() {
            return Ok(());
        }
        let candidate = {
            let slots = self.slots.lock().unwrap();
            slots
                .values()
                .find(|s| s.actor.enabled)
                .map(|s| s.actor.actor_id.clone())
        };
        let Some(candidate) = candidate else {
            return Ok(());
        };
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&candidate) {
                slot.actor.role = ActorRole::Foreman;
            }
        }
        info!(actor_id = %candidate, "auto-promoted foreman");
        let partial = EventPartial {
            id: None,
            kind: EventKind::ActorUpdate,
            group_id: self.group_id.clone(),
            scope_key: String::new(),
            by: by.clone(),
            data: serde_json::json!({"actor_id": candidate, "role": "foreman"}),
        };
        self.ledger.append(partial).await?;
        Ok(())
    }
}

fn spawn_runner(actor: &Actor, cwd: &Path, env: &HashMap<String, String>) -> Result<Box<dyn Runner>> {
    let spec = SpawnSpec {
        command: &actor.command,
        cwd,
        env,
    };
    match actor.runner {
        RunnerKind::Pty => Ok(Box::new(PtyRunner::spawn(spec)?)),
        RunnerKind::Headless => Ok(Box::new(HeadlessRunner::spawn(spec)?)),
    }
}

fn reason(check: cccc_users::PermissionCheck) -> String {
    match check {
        cccc_users::PermissionCheck::Denied { reason } => reason,
        cccc_users::PermissionCheck::Allowed => unreachable!("reason() called on an allowed check"),
    }
}

impl ActorDirectory for ActorSupervisor {
    fn actor_ids(&self) -> Vec<String> {
        self.slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.actor.enabled)
            .map(|s| s.actor.actor_id.clone())
            .collect()
    }

    fn exists(&self, actor_id: &str) -> bool {
        self.slots.lock().unwrap().contains_key(actor_id)
    }

    fn resolve_title(&self, title: &str) -> Option<String> {
        let slots = self.slots.lock().unwrap();
        let matches: Vec<&String> = slots
            .values()
            .filter(|s| s.actor.title.eq_ignore_ascii_case(title))
            .map(|s| &s.actor.actor_id)
            .collect();
        if matches.len() == 1 {
            Some(matches[0].clone())
        } else {
            None
        }
    }

    fn foreman_id(&self) -> Option<String> {
        self.foreman()
    }

    fn is_running(&self, actor_id: &str) -> bool {
        ActorSupervisor::is_running(self, actor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn test_actor(id: &str, role: ActorRole) -> Actor {
        Actor {
            actor_id: id.to_string(),
            title: id.to_string(),
            role,
            runner: RunnerKind::Headless,
            runtime: "shell".into(),
            command: vec!["true".into()],
            env: Map::new(),
            env_private_keys: vec![],
            default_scope_key: String::new(),
            enabled: true,
            state: LifecycleState::Stopped,
        }
    }

    async fn supervisor(dir: &std::path::Path) -> ActorSupervisor {
        let home = RuntimeHome::new(dir);
        let ledger = Arc::new(
            Ledger::open(&home, "g1", cccc_core::config::LedgerConfig::default(), None).unwrap(),
        );
        ActorSupervisor::new(home, "g1", ledger)
    }

    #[tokio::test]
    async fn first_enabled_actor_is_auto_promoted_foreman() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path()).await;
        sup.add(&Principal::User, test_actor("A", ActorRole::Peer)).await.unwrap();
        assert_eq!(sup.foreman_id(), Some("A".to_string()));
    }

    #[tokio::test]
    async fn non_foreman_peer_cannot_add_actors() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path()).await;
        // A is auto-promoted foreman on first add, so it may add B.
        sup.add(&Principal::User, test_actor("A", ActorRole::Peer)).await.unwrap();
        sup.add(&Principal::Actor("A".into()), test_actor("B", ActorRole::Peer))
            .await
            .unwrap();
        // B is a plain peer and must not be able to add C.
        let err = sup
            .add(&Principal::Actor("B".into()), test_actor("C", ActorRole::Peer))
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn start_without_project_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path()).await;
        sup.add(&Principal::User, test_actor("A", ActorRole::Peer)).await.unwrap();
        let err = sup
            .start(&Principal::User, "A", None, &Map::new(), LifecycleCause::User)
            .await
            .unwrap_err();
        assert!(matches!(err, ActorError::MissingProjectRoot(_)));
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path()).await;
        sup.add(&Principal::User, test_actor("A", ActorRole::Peer)).await.unwrap();
        sup.start(&Principal::User, "A", Some(dir.path()), &Map::new(), LifecycleCause::User)
            .await
            .unwrap();
        assert!(sup.is_running("A"));
        sup.stop(&Principal::User, "A", LifecycleCause::User).await.unwrap();
        assert!(!sup.is_running("A"));
    }
}
