//! `send`/`reply`/relay submission pipeline (spec §4.5, C5).

use std::path::PathBuf;
use std::sync::Arc;

use cccc_actors::ActorSupervisor;
use cccc_core::config::DeliveryConfig;
use cccc_core::event::{
    Attachment, ChatMessageData, Event, EventKind, EventPartial, MessageFormat, MessagePriority, SystemNotifyData,
};
use cccc_core::home::RuntimeHome;
use cccc_core::principal::Principal;
use cccc_core::recipient;
use cccc_ledger::Ledger;
use tracing::{debug, info, instrument, warn};

use crate::error::{DeliveryError, Result};
use crate::idempotency::IdempotencyCache;
use crate::injection::InjectionPipeline;

/// Cross-group relay provenance, carried by the event appended on the
/// *destination* side (spec §4.5 step 5).
#[derive(Debug, Clone)]
pub struct RelayProvenance {
    pub src_group_id: String,
    pub src_event_id: String,
}

/// Outbound relay target, carried by the event appended on the *source*
/// side. `to` is the destination group's raw recipient tokens — they name
/// actors/selectors in the destination's directory, not this group's, so
/// they are stored as-is and never run through local `recipient::normalize`.
#[derive(Debug, Clone)]
pub struct DstRelay {
    pub group_id: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub by: Principal,
    pub to: Vec<String>,
    pub text: String,
    pub format: MessageFormat,
    pub reply_to: Option<String>,
    pub quote_text: Option<String>,
    pub priority: MessagePriority,
    pub attachments: Vec<Attachment>,
    pub client_id: Option<String>,
    pub scope_key: String,
    pub relay: Option<RelayProvenance>,
    /// Set only on the source-group submission of a cross-group relay. When
    /// present, the event carries no local recipients — it is an outbound
    /// record, not a delivery — and `to` is ignored.
    pub dst: Option<DstRelay>,
}

pub struct DeliveryPipeline {
    group_id: String,
    ledger: Arc<Ledger>,
    inbox: Arc<cccc_inbox::InboxEngine>,
    supervisor: Arc<ActorSupervisor>,
    idempotency: IdempotencyCache,
    injector: Arc<InjectionPipeline>,
    config: DeliveryConfig,
    group_state: Arc<dyn cccc_core::GroupStateSource>,
}

impl DeliveryPipeline {
    pub fn new(
        home: &RuntimeHome,
        group_id: impl Into<String>,
        ledger: Arc<Ledger>,
        inbox: Arc<cccc_inbox::InboxEngine>,
        supervisor: Arc<ActorSupervisor>,
        config: DeliveryConfig,
        group_state: Arc<dyn cccc_core::GroupStateSource>,
    ) -> Self {
        let group_id = group_id.into();
        let injector = InjectionPipeline::new(
            group_id.clone(),
            config.clone(),
            Arc::clone(&supervisor),
            Arc::clone(&ledger),
            home.runtime_work_dir(&group_id),
        );
        Self {
            group_id,
            ledger,
            inbox,
            supervisor,
            idempotency: IdempotencyCache::new(),
            injector,
            config,
            group_state,
        }
    }

    /// Append the message and best-effort inject it into every running
    /// recipient (spec §4.5 steps 1-4).
    #[instrument(skip(self, req), fields(group_id = %self.group_id))]
    pub async fn submit(&self, req: SubmitRequest) -> Result<Event> {
        if req.text.is_empty() && req.attachments.is_empty() {
            return Err(DeliveryError::InvalidRequest(
                "message must have non-empty text or at least one attachment".into(),
            ));
        }
        if let Some(relay) = &req.relay {
            if relay.src_group_id.is_empty() || relay.src_event_id.is_empty() {
                return Err(DeliveryError::InvalidRequest(
                    "relay provenance requires both src_group_id and src_event_id".into(),
                ));
            }
        }
        if let Some(client_id) = &req.client_id {
            if let Some(existing) = self.idempotency.lookup(&req.by, client_id) {
                info!(client_id, "submission replay, returning existing event");
                return Ok(existing);
            }
        }

        let sender = sender_actor_id(&req.by);
        // An outbound relay record has no local recipients — `req.to` names
        // actors in the destination group, not this one.
        let normalized = match &req.dst {
            Some(_) => Vec::new(),
            None => recipient::normalize(&req.to, self.supervisor.as_ref()).map_err(DeliveryError::Core)?,
        };

        let data = ChatMessageData {
            text: req.text.clone(),
            format: req.format,
            to: normalized,
            reply_to: req.reply_to.clone(),
            quote_text: req.quote_text.clone(),
            priority: req.priority,
            src_group_id: req.relay.as_ref().map(|r| r.src_group_id.clone()),
            src_event_id: req.relay.as_ref().map(|r| r.src_event_id.clone()),
            dst_group_id: req.dst.as_ref().map(|d| d.group_id.clone()),
            dst_to: req.dst.as_ref().map(|d| d.to.clone()),
            attachments: req.attachments.clone(),
            client_id: req.client_id.clone(),
        };

        let partial = EventPartial {
            id: None,
            kind: EventKind::ChatMessage,
            group_id: self.group_id.clone(),
            scope_key: req.scope_key.clone(),
            by: req.by.clone(),
            data: serde_json::to_value(&data)?,
        };
        let event = self.ledger.append(partial).await?;

        if let Some(client_id) = &req.client_id {
            self.idempotency.record(&req.by, client_id, event.clone());
        }

        if req.dst.is_none() {
            self.deliver(&event, &data, sender.as_deref()).await;
        }
        Ok(event)
    }

    /// Resolve recipients and fan out a best-effort injection to every one
    /// that is currently running (spec §4.5 step 4). Failures here never
    /// propagate — the event is already durable.
    async fn deliver(&self, event: &Event, data: &ChatMessageData, sender: Option<&str>) {
        if self.group_state.group_state() == cccc_core::GroupState::Paused {
            debug!("group paused, event appended but delivery suppressed");
            return;
        }
        let resolved = recipient::resolve(&data.to, self.supervisor.as_ref(), sender);
        let recipient_label = if data.to.is_empty() {
            "@all".to_string()
        } else {
            data.to.join(",")
        };

        for actor_id in &resolved.actor_ids {
            if data.priority == MessagePriority::Attention {
                if let Err(e) = self.inbox.record_attention(actor_id, &event.id) {
                    warn!(actor_id, error = %e, "failed to record attention state");
                }
            }
            if !self.supervisor.is_running(actor_id) {
                continue;
            }
            let runtime = self
                .supervisor
                .get(actor_id)
                .map(|a| a.runtime)
                .unwrap_or_default();
            if let Err(e) = self
                .injector
                .enqueue(actor_id, &event.by.to_string(), &recipient_label, &data.text, &runtime)
                .await
            {
                warn!(actor_id, error = %e, "failed to enqueue injection");
            }
        }
    }

    /// Append and best-effort deliver a `system.notify` event (spec §4.6).
    /// Automation policies are the only caller; the ack side lives in C3.
    #[instrument(skip(self, text), fields(group_id = %self.group_id, notify_kind))]
    pub async fn notify(
        &self,
        to: Vec<String>,
        notify_kind: &str,
        text: &str,
        requires_ack: bool,
    ) -> Result<Event> {
        let normalized =
            recipient::normalize(&to, self.supervisor.as_ref()).map_err(DeliveryError::Core)?;
        let data = SystemNotifyData {
            notify_kind: notify_kind.to_string(),
            to: normalized.clone(),
            text: text.to_string(),
            requires_ack,
        };
        let partial = EventPartial {
            id: None,
            kind: EventKind::SystemNotify,
            group_id: self.group_id.clone(),
            scope_key: String::new(),
            by: Principal::System,
            data: serde_json::to_value(&data)?,
        };
        let event = self.ledger.append(partial).await?;

        if self.group_state.group_state() == cccc_core::GroupState::Paused {
            debug!("group paused, notify appended but delivery suppressed");
            return Ok(event);
        }
        let resolved = recipient::resolve(&normalized, self.supervisor.as_ref(), None);
        let recipient_label = if normalized.is_empty() {
            "@all".to_string()
        } else {
            normalized.join(",")
        };
        for actor_id in &resolved.actor_ids {
            if !self.supervisor.is_running(actor_id) {
                continue;
            }
            let runtime = self
                .supervisor
                .get(actor_id)
                .map(|a| a.runtime)
                .unwrap_or_default();
            if let Err(e) = self
                .injector
                .enqueue(actor_id, "system", &recipient_label, text, &runtime)
                .await
            {
                warn!(actor_id, error = %e, "failed to enqueue notification injection");
            }
        }
        Ok(event)
    }

    /// Replay recent unread messages addressed to `actor_id` (and its open
    /// attention items) right after it starts (spec §4.5 "tie-breaks").
    #[instrument(skip(self), fields(group_id = %self.group_id, actor_id))]
    pub async fn replay_preamble(&self, actor_id: &str) -> Result<()> {
        let tail_count = self.config.preamble_tail_count;
        let all_chat = self
            .ledger
            .tail(None, None, Some(&[EventKind::ChatMessage]))
            .await?;

        let mut addressed: Vec<Event> = Vec::new();
        for event in all_chat {
            let data: ChatMessageData = event.data_as()?;
            let resolved = recipient::resolve(&data.to, self.supervisor.as_ref(), Some(&event.by.to_string()));
            if resolved.actor_ids.iter().any(|id| id.as_str() == actor_id) {
                addressed.push(event);
            }
        }
        let start = addressed.len().saturating_sub(tail_count);
        let runtime = self
            .supervisor
            .get(actor_id)
            .map(|a| a.runtime)
            .unwrap_or_default();

        for event in &addressed[start..] {
            let data: ChatMessageData = event.data_as()?;
            if !self.inbox.cursor(actor_id).map(|c| c.last_read_event_id == event.id).unwrap_or(false) {
                let label = if data.to.is_empty() { "@all".to_string() } else { data.to.join(",") };
                if let Err(e) = self
                    .injector
                    .enqueue(actor_id, &event.by.to_string(), &label, &data.text, &runtime)
                    .await
                {
                    warn!(actor_id, error = %e, "preamble replay injection failed");
                }
            }
        }

        for event_id in self.inbox.open_attention(actor_id) {
            if let Err(e) = self
                .injector
                .enqueue(actor_id, "system", "you", &format!("open attention item: {event_id}"), &runtime)
                .await
            {
                warn!(actor_id, error = %e, "attention preamble injection failed");
            }
        }
        Ok(())
    }
}

fn sender_actor_id(by: &Principal) -> Option<String> {
    match by {
        Principal::Actor(id) => Some(id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cccc_core::config::LedgerConfig;

    struct AlwaysActive;
    impl cccc_core::GroupStateSource for AlwaysActive {
        fn group_state(&self) -> cccc_core::GroupState {
            cccc_core::GroupState::Active
        }
    }

    async fn pipeline(dir: &std::path::Path) -> DeliveryPipeline {
        let home = RuntimeHome::new(dir);
        let ledger = Arc::new(Ledger::open(&home, "g1", LedgerConfig::default(), None).unwrap());
        let inbox = Arc::new(cccc_inbox::InboxEngine::open(&home, "g1").unwrap());
        let supervisor = Arc::new(ActorSupervisor::new(home.clone(), "g1", Arc::clone(&ledger)));
        DeliveryPipeline::new(
            &home,
            "g1",
            ledger,
            inbox,
            supervisor,
            DeliveryConfig::default(),
            Arc::new(AlwaysActive),
        )
    }

    #[tokio::test]
    async fn rejects_empty_message() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path()).await;
        let err = p
            .submit(SubmitRequest {
                by: Principal::User,
                to: vec![],
                text: String::new(),
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
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn duplicate_client_id_returns_same_event() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path()).await;
        let req = || SubmitRequest {
            by: Principal::User,
            to: vec![],
            text: "hi".into(),
            format: MessageFormat::Plain,
            reply_to: None,
            quote_text: None,
            priority: MessagePriority::Normal,
            attachments: vec![],
            client_id: Some("c1".into()),
            scope_key: String::new(),
            relay: None,
            dst: None,
        };
        let e1 = p.submit(req()).await.unwrap();
        let e2 = p.submit(req()).await.unwrap();
        assert_eq!(e1.id, e2.id);
    }

    #[tokio::test]
    async fn relay_requires_both_provenance_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path()).await;
        let err = p
            .submit(SubmitRequest {
                by: Principal::User,
                to: vec![],
                text: "hi".into(),
                format: MessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: Some(RelayProvenance {
                    src_group_id: "g0".into(),
                    src_event_id: String::new(),
                }),
                dst: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn outbound_relay_carries_dst_metadata_and_skips_local_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path()).await;
        let event = p
            .submit(SubmitRequest {
                by: Principal::User,
                to: vec![],
                text: "hi".into(),
                format: MessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: None,
                dst: Some(DstRelay {
                    group_id: "gB".into(),
                    to: vec!["@all".into()],
                }),
            })
            .await
            .unwrap();
        let data: ChatMessageData = event.data_as().unwrap();
        assert!(data.to.is_empty());
        assert_eq!(data.dst_group_id.as_deref(), Some("gB"));
        assert_eq!(data.dst_to, Some(vec!["@all".to_string()]));
    }

    #[tokio::test]
    async fn notify_appends_system_notify_event() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path()).await;
        let event = p
            .notify(vec![], "nudge", "are you there?", false)
            .await
            .unwrap();
        assert_eq!(event.kind, EventKind::SystemNotify);
        assert_eq!(event.by, Principal::System);
    }
}
