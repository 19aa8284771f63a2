//! Best-effort pacing policies that keep a working group moving without a
//! human in the loop (spec §4.6, C6).
//!
//! Modeled on the scheduler's single poll loop: one timer tick, one pass
//! over every policy check. Nothing here is durable except the
//! `system.notify` events a check decides to send — a daemon restart loses
//! all pacing counters and simply starts fresh, which is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cccc_actors::ActorSupervisor;
use cccc_core::config::AutomationConfig;
use cccc_core::event::{ChatMessageData, Event, EventKind, MessagePriority};
use cccc_core::recipient::{self, ActorDirectory};
use cccc_delivery::DeliveryPipeline;
use cccc_inbox::InboxEngine;
use cccc_ledger::Ledger;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};

use crate::state::AutomationState;
use crate::Result;

/// A chat message still unread by `actor_id`, in ledger order.
struct Unread<'a> {
    actor_id: &'a str,
    events: Vec<&'a Event>,
}

pub struct AutomationEngine {
    group_id: String,
    config: AutomationConfig,
    ledger: Arc<Ledger>,
    inbox: Arc<InboxEngine>,
    supervisor: Arc<ActorSupervisor>,
    delivery: Arc<DeliveryPipeline>,
    group_state: Arc<dyn cccc_core::GroupStateSource>,
    state: Mutex<AutomationState>,
}

impl AutomationEngine {
    pub fn new(
        group_id: impl Into<String>,
        config: AutomationConfig,
        ledger: Arc<Ledger>,
        inbox: Arc<InboxEngine>,
        supervisor: Arc<ActorSupervisor>,
        delivery: Arc<DeliveryPipeline>,
        group_state: Arc<dyn cccc_core::GroupStateSource>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            config,
            ledger,
            inbox,
            supervisor,
            delivery,
            group_state,
            state: Mutex::new(AutomationState::default()),
        }
    }

    /// Main loop. Ticks at `1/tick_hz` seconds until `shutdown` broadcasts
    /// `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(group_id = %self.group_id, "automation engine started");
        let period_ms = 1000 / self.config.tick_hz.max(1) as u64;
        let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(group_id = %self.group_id, error = %e, "automation tick error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(group_id = %self.group_id, "automation engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every policy, for every enabled actor. A group that is
    /// `idle` or `paused` gets no automation at all — only `active` groups
    /// are paced (direct chat delivery has its own, separate gate in C5).
    #[instrument(skip(self), fields(group_id = %self.group_id))]
    async fn tick(&self) -> Result<()> {
        if self.group_state.group_state() != cccc_core::GroupState::Active {
            return Ok(());
        }

        let chat = self
            .ledger
            .tail(None, None, Some(&[EventKind::ChatMessage]))
            .await?;
        let now = Utc::now();

        self.check_silence(&chat, now).await?;

        for actor in self.supervisor.list() {
            if !actor.enabled {
                continue;
            }
            let unread = self.unread_for(&actor.actor_id, &chat)?;
            self.check_nudge(&unread, now).await?;
            self.check_actor_idle(&unread, now).await?;
            self.check_self_check_and_refresh(&unread).await?;
            self.check_help_nudge(&actor.actor_id, &chat, now).await?;
        }
        Ok(())
    }

    /// Chat messages addressed to `actor_id` that postdate its read cursor
    /// (or all of them, if the actor has never read anything).
    fn unread_for<'a>(&self, actor_id: &'a str, chat: &'a [Event]) -> Result<Unread<'a>> {
        let cursor = self.inbox.cursor(actor_id);
        let mut events = Vec::new();
        for event in chat {
            let data: ChatMessageData = event.data_as()?;
            let resolved = recipient::resolve(&data.to, self.supervisor.as_ref(), Some(&event.by.to_string()));
            if !resolved.actor_ids.iter().any(|id| id.as_str() == actor_id) {
                continue;
            }
            let is_unread = match &cursor {
                Some(c) => event.ts > c.last_read_ts,
                None => true,
            };
            if is_unread {
                events.push(event);
            }
        }
        Ok(Unread { actor_id, events })
    }

    /// Nudge an actor with unread mail sitting too long (spec §4.6).
    async fn check_nudge(&self, unread: &Unread<'_>, now: DateTime<Utc>) -> Result<()> {
        let Some(oldest) = unread.events.first() else {
            return Ok(());
        };
        let age = now.signed_duration_since(oldest.ts);
        if age.num_seconds() < self.config.nudge_after_seconds as i64 {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !self.keepalive_gate(&mut state, unread.actor_id, now, |a| &mut a.last_nudge_at) {
            return Ok(());
        }
        drop(state);
        self.send_notify(
            vec![unread.actor_id.to_string()],
            "nudge",
            &format!("you have {} unread message(s) waiting", unread.events.len()),
        )
        .await;
        Ok(())
    }

    /// Flag an actor that has stopped producing output despite unread mail
    /// (spec §4.6). Reported to the foreman, since the actor itself is the
    /// one not responding.
    async fn check_actor_idle(&self, unread: &Unread<'_>, now: DateTime<Utc>) -> Result<()> {
        if unread.events.is_empty() || !self.supervisor.is_running(unread.actor_id) {
            return Ok(());
        }
        let Some(last_activity) = self.supervisor.last_activity_at(unread.actor_id) else {
            return Ok(());
        };
        let idle_for = now.signed_duration_since(last_activity);
        if idle_for.num_seconds() < self.config.actor_idle_timeout_seconds as i64 {
            return Ok(());
        }
        let Some(foreman_id) = self.supervisor.foreman_id() else {
            return Ok(());
        };
        if foreman_id == unread.actor_id {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !self.keepalive_gate(&mut state, unread.actor_id, now, |a| &mut a.last_actor_idle_notify_at) {
            return Ok(());
        }
        drop(state);
        self.send_notify(
            vec![foreman_id],
            "actor_idle",
            &format!("{} has been idle with unread mail for a while", unread.actor_id),
        )
        .await;
        Ok(())
    }

    /// Broadcast a silence warning when nobody has chatted in a while.
    async fn check_silence(&self, chat: &[Event], now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(last) = chat.last() {
            if state.last_chat_message_at.map(|t| t < last.ts).unwrap_or(true) {
                state.last_chat_message_at = Some(last.ts);
            }
        }
        let Some(last_chat) = state.last_chat_message_at else {
            return Ok(());
        };
        let silent_for = now.signed_duration_since(last_chat);
        if silent_for.num_seconds() < self.config.silence_timeout_seconds as i64 {
            return Ok(());
        }
        if let Some(last_notify) = state.last_silence_notify_at {
            if last_notify > last_chat {
                return Ok(());
            }
        }
        state.last_silence_notify_at = Some(now);
        drop(state);
        self.send_notify(vec![], "silence", "the group has been quiet for a while").await;
        Ok(())
    }

    /// Count newly-seen unread handoffs since the last tick and, crossing
    /// `self_check_every_handoffs`, ask the actor to re-orient; crossing
    /// `system_refresh_every_self_checks` self-checks escalates to a full
    /// system refresh prompt.
    async fn check_self_check_and_refresh(&self, unread: &Unread<'_>) -> Result<()> {
        let Some(newest) = unread.events.last() else {
            return Ok(());
        };
        let mut state = self.state.lock().await;
        let actor_state = state.actor_mut(unread.actor_id);
        if actor_state.last_counted_event_id.as_deref() == Some(newest.id.as_str()) {
            return Ok(());
        }
        let already_counted = actor_state.last_counted_event_id.clone();
        let new_count = unread
            .events
            .iter()
            .rev()
            .take_while(|e| Some(e.id.as_str()) != already_counted.as_deref())
            .count();
        actor_state.last_counted_event_id = Some(newest.id.clone());
        actor_state.handoffs_since_self_check += new_count as u32;

        let mut self_checks_fired = 0u32;
        while actor_state.handoffs_since_self_check >= self.config.self_check_every_handoffs {
            actor_state.handoffs_since_self_check -= self.config.self_check_every_handoffs;
            actor_state.self_checks_since_refresh += 1;
            self_checks_fired += 1;
        }
        let mut refreshes_fired = 0u32;
        while actor_state.self_checks_since_refresh >= self.config.system_refresh_every_self_checks {
            actor_state.self_checks_since_refresh -= self.config.system_refresh_every_self_checks;
            refreshes_fired += 1;
        }
        let actor_id = unread.actor_id.to_string();
        drop(state);

        if refreshes_fired > 0 {
            self.send_notify(
                vec![actor_id.clone()],
                "system_refresh",
                "re-read the group's current state before continuing",
            )
            .await;
        } else if self_checks_fired > 0 {
            self.send_notify(
                vec![actor_id],
                "self_check",
                "pause and confirm your next step still matches the goal",
            )
            .await;
        }
        Ok(())
    }

    /// An actor whose own attention-priority messages are piling up unacked
    /// is plausibly stuck waiting on help; nudge its recipients.
    async fn check_help_nudge(&self, actor_id: &str, chat: &[Event], now: DateTime<Utc>) -> Result<()> {
        let mut still_open: Vec<(&Event, ChatMessageData)> = Vec::new();
        for event in chat {
            let cccc_core::Principal::Actor(sender) = &event.by else {
                continue;
            };
            if sender != actor_id {
                continue;
            }
            let data: ChatMessageData = event.data_as()?;
            if data.priority != MessagePriority::Attention {
                continue;
            }
            let resolved = recipient::resolve(&data.to, self.supervisor.as_ref(), Some(actor_id));
            let open = resolved
                .actor_ids
                .iter()
                .any(|id| self.inbox.open_attention(id).iter().any(|e| e == &event.id));
            if open {
                still_open.push((event, data));
            }
        }
        if still_open.len() < self.config.help_nudge_min_messages as usize {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !self.keepalive_gate(&mut state, actor_id, now, |a| &mut a.last_help_nudge_at) {
            return Ok(());
        }
        drop(state);
        let Some(foreman_id) = self.supervisor.foreman_id() else {
            return Ok(());
        };
        self.send_notify(
            vec![foreman_id],
            "help_nudge",
            &format!("{actor_id} has {} attention-priority message(s) still unacked", still_open.len()),
        )
        .await;
        Ok(())
    }

    /// Shared repeat-notification cap (spec §4.6 keepalive): an actor gets
    /// at most `keepalive_max_per_actor` repeats of a given notification
    /// kind before the counter is held until `keepalive_delay_seconds` has
    /// passed since the first one in the run.
    fn keepalive_gate(
        &self,
        state: &mut AutomationState,
        actor_id: &str,
        now: DateTime<Utc>,
        field: impl Fn(&mut crate::state::ActorAutomationState) -> &mut Option<DateTime<Utc>>,
    ) -> bool {
        let actor_state = state.actor_mut(actor_id);
        let last_at = *field(actor_state);
        let elapsed = last_at.map(|t| now.signed_duration_since(t).num_seconds());
        if let Some(elapsed) = elapsed {
            if elapsed >= self.config.keepalive_delay_seconds as i64 {
                actor_state.keepalive_count = 0;
            }
        }
        if actor_state.keepalive_count >= self.config.keepalive_max_per_actor {
            return false;
        }
        actor_state.keepalive_count += 1;
        *field(actor_state) = Some(now);
        true
    }

    async fn send_notify(&self, to: Vec<String>, kind: &str, text: &str) {
        if let Err(e) = self.delivery.notify(to, kind, text, false).await {
            warn!(group_id = %self.group_id, kind, error = %e, "failed to send automation notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cccc_actors::{ActorRole, LifecycleState, RunnerKind};
    use cccc_core::config::{DeliveryConfig, LedgerConfig};
    use cccc_core::event::{MessageFormat, MessagePriority};
    use cccc_core::home::RuntimeHome;
    use cccc_core::Principal;
    use cccc_delivery::SubmitRequest;
    use std::collections::HashMap;

    struct AlwaysActive;
    impl cccc_core::GroupStateSource for AlwaysActive {
        fn group_state(&self) -> cccc_core::GroupState {
            cccc_core::GroupState::Active
        }
    }

    fn test_actor(id: &str) -> cccc_actors::Actor {
        cccc_actors::Actor {
            actor_id: id.to_string(),
            title: id.to_string(),
            role: ActorRole::Peer,
            runner: RunnerKind::Headless,
            runtime: "shell".into(),
            command: vec!["true".into()],
            env: HashMap::new(),
            env_private_keys: vec![],
            default_scope_key: String::new(),
            enabled: true,
            state: LifecycleState::Stopped,
        }
    }

    async fn harness(dir: &std::path::Path) -> AutomationEngine {
        let home = RuntimeHome::new(dir);
        let ledger = Arc::new(Ledger::open(&home, "g1", LedgerConfig::default(), None).unwrap());
        let inbox = Arc::new(InboxEngine::open(&home, "g1").unwrap());
        let supervisor = Arc::new(ActorSupervisor::new(home.clone(), "g1", Arc::clone(&ledger)));
        supervisor.add(&Principal::User, test_actor("A")).await.unwrap();
        let delivery = Arc::new(DeliveryPipeline::new(
            &home,
            "g1",
            Arc::clone(&ledger),
            Arc::clone(&inbox),
            Arc::clone(&supervisor),
            DeliveryConfig::default(),
            Arc::new(AlwaysActive),
        ));
        let mut config = AutomationConfig::default();
        config.nudge_after_seconds = 0;
        config.help_nudge_min_messages = 1;
        AutomationEngine::new("g1", config, ledger, inbox, supervisor, delivery, Arc::new(AlwaysActive))
    }

    #[tokio::test]
    async fn nudge_fires_for_stale_unread_message() {
        let dir = tempfile::tempdir().unwrap();
        let engine = harness(dir.path()).await;
        engine
            .delivery
            .submit(SubmitRequest {
                by: Principal::User,
                to: vec!["A".into()],
                text: "hello".into(),
                format: MessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: None,
                dst: None,
            })
            .await
            .unwrap();

        engine.tick().await.unwrap();

        let notifies = engine
            .ledger
            .tail(None, None, Some(&[EventKind::SystemNotify]))
            .await
            .unwrap();
        assert_eq!(notifies.len(), 1);
        let data: cccc_core::event::SystemNotifyData = notifies[0].data_as().unwrap();
        assert_eq!(data.notify_kind, "nudge");
        assert_eq!(data.to, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn keepalive_gate_caps_repeats_until_delay_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let engine = harness(dir.path()).await;
        let mut state = AutomationState::default();
        for _ in 0..3 {
            assert!(engine.keepalive_gate(&mut state, "A", Utc::now(), |a| &mut a.last_nudge_at));
        }
        assert!(!engine.keepalive_gate(&mut state, "A", Utc::now(), |a| &mut a.last_nudge_at));
    }

    #[tokio::test]
    async fn idle_or_paused_group_skips_automation_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        let ledger = Arc::new(Ledger::open(&home, "g1", LedgerConfig::default(), None).unwrap());
        let inbox = Arc::new(InboxEngine::open(&home, "g1").unwrap());
        let supervisor = Arc::new(ActorSupervisor::new(home.clone(), "g1", Arc::clone(&ledger)));
        supervisor.add(&Principal::User, test_actor("A")).await.unwrap();

        struct Paused;
        impl cccc_core::GroupStateSource for Paused {
            fn group_state(&self) -> cccc_core::GroupState {
                cccc_core::GroupState::Paused
            }
        }
        let delivery = Arc::new(DeliveryPipeline::new(
            &home,
            "g1",
            Arc::clone(&ledger),
            Arc::clone(&inbox),
            Arc::clone(&supervisor),
            DeliveryConfig::default(),
            Arc::new(Paused),
        ));
        delivery
            .submit(SubmitRequest {
                by: Principal::User,
                to: vec!["A".into()],
                text: "hello".into(),
                format: MessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: None,
                dst: None,
            })
            .await
            .unwrap();

        let mut config = AutomationConfig::default();
        config.nudge_after_seconds = 0;
        let engine = AutomationEngine::new("g1", config, Arc::clone(&ledger), inbox, supervisor, delivery, Arc::new(Paused));
        engine.tick().await.unwrap();

        let notifies = ledger.tail(None, None, Some(&[EventKind::SystemNotify])).await.unwrap();
        assert!(notifies.is_empty());
    }
}
