//! [`OpHandler`] implementation: the IPC op catalog (spec §6) dispatched to
//! the right [`GroupRuntime`] component.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cccc_actors::Actor;
use cccc_bus::Subscription;
use cccc_core::event::{
    Attachment, EventKind, LifecycleCause, MessageFormat as CoreMessageFormat, MessagePriority,
};
use cccc_core::principal::Principal;
use cccc_delivery::{DstRelay, RelayProvenance, SubmitRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::daemon::Daemon;
use crate::error::{DaemonError, Result as DaemonResult};
use crate::group::Scope;

pub struct DaemonHandler {
    daemon: Arc<Daemon>,
    /// In-memory-only private env values, keyed by `(group_id, actor_id)`
    /// (spec §4.4: "values stored outside the ledger"; there is no durable
    /// secret store in this build, so a restart clears them like a crashed
    /// actor's own environment would).
    env_private: AsyncMutex<HashMap<(String, String), HashMap<String, String>>>,
}

impl DaemonHandler {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self {
            daemon,
            env_private: AsyncMutex::new(HashMap::new()),
        }
    }
}

fn group_id_of(args: &Value) -> DaemonResult<String> {
    args.get("group_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::MissingGroupId))
}

fn actor_id_of(args: &Value) -> DaemonResult<String> {
    args.get("actor_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::MissingActorId))
}

fn by_of(args: &Value) -> Principal {
    args.get("by")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Principal::User)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SendArgs {
    group_id: String,
    by: Option<String>,
    to: Vec<String>,
    text: String,
    format: Option<String>,
    reply_to: Option<String>,
    quote_text: Option<String>,
    priority: Option<String>,
    attachments: Vec<Attachment>,
    client_id: Option<String>,
    scope_key: Option<String>,
}

fn parse_format(s: Option<String>) -> CoreMessageFormat {
    match s.as_deref() {
        Some("markdown") => CoreMessageFormat::Markdown,
        _ => CoreMessageFormat::Plain,
    }
}

fn parse_priority(s: Option<String>) -> MessagePriority {
    match s.as_deref() {
        Some("attention") => MessagePriority::Attention,
        _ => MessagePriority::Normal,
    }
}

#[async_trait]
impl cccc_ipc::handler::OpHandler for DaemonHandler {
    async fn call(&self, op: &str, args: Value) -> cccc_ipc::Result<Value> {
        self.dispatch(op, args).await.map_err(Into::into)
    }

    fn subscribe_events(&self, group_id: &str, kinds: Option<Vec<String>>) -> cccc_ipc::Result<Subscription> {
        let kinds = kinds.map(|ks| {
            ks.into_iter()
                .map(|s| EventKind::try_from(s).unwrap())
                .collect::<Vec<_>>()
        });
        let bus = self
            .daemon_bus(group_id)
            .map_err(Into::<cccc_ipc::IpcError>::into)?;
        Ok(bus.subscribe(kinds))
    }

    fn drain_terminal(&self, group_id: &str, actor_id: &str) -> cccc_ipc::Result<String> {
        self.with_supervisor_sync(group_id, |s| Ok(s.drain_output(actor_id)?))
            .map_err(Into::into)
    }

    fn write_terminal(&self, group_id: &str, actor_id: &str, bytes: &[u8]) -> cccc_ipc::Result<()> {
        self.with_supervisor_sync(group_id, |s| Ok(s.inject(actor_id, bytes)?))
            .map_err(Into::into)
    }

    fn resize_terminal(&self, group_id: &str, actor_id: &str, cols: u16, rows: u16) -> cccc_ipc::Result<()> {
        self.with_supervisor_sync(group_id, |s| Ok(s.resize(actor_id, cols, rows)?))
            .map_err(Into::into)
    }
}

impl DaemonHandler {
    fn daemon_bus(&self, group_id: &str) -> DaemonResult<Arc<cccc_bus::EventBus>> {
        block_on_runtime(self.daemon.with_runtime(group_id, |rt| Ok(rt.bus())))
    }

    /// Append an audit-only event to a group's ledger if its runtime
    /// happens to be open. Group CRUD state lives in the registry, not the
    /// ledger, so a closed group's history simply omits the audit entry.
    async fn audit(&self, group_id: &str, kind: EventKind, data: Value) {
        if let Ok(ledger) = self.daemon.with_runtime(group_id, |rt| Ok(rt.ledger.clone())).await {
            let partial = cccc_core::event::EventPartial {
                id: None,
                kind,
                group_id: group_id.to_string(),
                scope_key: String::new(),
                by: Principal::User,
                data,
            };
            let _ = ledger.append(partial).await;
        }
    }

    fn with_supervisor_sync<T>(
        &self,
        group_id: &str,
        f: impl FnOnce(&cccc_actors::ActorSupervisor) -> DaemonResult<T>,
    ) -> DaemonResult<T> {
        block_on_runtime(self.daemon.with_runtime(group_id, |rt| f(&rt.supervisor)))
    }

    async fn dispatch(&self, op: &str, args: Value) -> DaemonResult<Value> {
        match op {
            "ping" => Ok(json!({"pong": true})),
            "shutdown" => {
                let daemon = self.daemon.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    daemon.shutdown().await;
                });
                Ok(json!({"shutting_down": true}))
            }
            "groups" => self.op_groups().await,
            "group_show" => self.op_group_show(args).await,
            "group_create" => self.op_group_create(args).await,
            "group_update" => self.op_group_update(args).await,
            "group_delete" => self.op_group_delete(args).await,
            "group_use" => self.op_group_use(args).await,
            "group_start" => self.op_group_start(args).await,
            "group_stop" => self.op_group_stop(args).await,
            "group_set_state" => self.op_group_set_state(args).await,
            "attach" => self.op_attach(args).await,

            "actor_list" => self.op_actor_list(args).await,
            "actor_add" => self.op_actor_add(args).await,
            "actor_update" => self.op_actor_update(args).await,
            "actor_remove" => self.op_actor_remove(args).await,
            "actor_start" => self.op_actor_start(args).await,
            "actor_stop" => self.op_actor_stop(args).await,
            "actor_restart" => self.op_actor_restart(args).await,
            "actor_env_private_get_keys" => self.op_env_private_get_keys(args).await,
            "actor_env_private_update" => self.op_env_private_update(args).await,

            "send" | "reply" => self.op_send(args).await,
            "send_cross_group" => self.op_send_cross_group(args).await,
            "chat_ack" => self.op_chat_ack(args).await,

            "inbox_list" => self.op_inbox_list(args).await,
            "inbox_mark_read" => self.op_inbox_mark_read(args).await,
            "inbox_mark_all_read" => self.op_inbox_mark_all_read(args).await,

            "system_notify" => self.op_system_notify(args).await,
            "notify_ack" => self.op_notify_ack(args).await,

            "terminal_tail" => self.op_terminal_tail(args).await,
            "terminal_clear" => self.op_terminal_clear(args).await,

            "ledger_snapshot" => self.op_ledger_snapshot(args).await,
            "ledger_compact" => self.op_ledger_compact(args).await,

            other => Err(DaemonError::Core(cccc_core::CcccError::UnknownOp(other.to_string()))),
        }
    }

    async fn op_groups(&self) -> DaemonResult<Value> {
        let groups: Vec<Value> = self
            .daemon
            .registry
            .list()
            .into_iter()
            .map(|m| json!({
                "group_id": m.group_id,
                "title": m.title,
                "state": m.state,
                "running": m.running,
            }))
            .collect();
        Ok(json!({"groups": groups}))
    }

    async fn op_group_show(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let meta = self
            .daemon
            .registry
            .get(&group_id)
            .ok_or_else(|| DaemonError::GroupNotFound(group_id.clone()))?;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_group_create(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(&group_id)
            .to_string();
        let topic = args.get("topic").and_then(Value::as_str).map(str::to_string);
        let meta = self.daemon.registry.create(&group_id, &title, topic)?;
        self.daemon.open_group(&group_id).await?;
        self.audit(&group_id, EventKind::GroupCreate, json!({"title": meta.title})).await;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_group_update(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let title = args.get("title").and_then(Value::as_str).map(str::to_string);
        let topic = args.get("topic").and_then(Value::as_str).map(str::to_string);
        let meta = self.daemon.registry.update(&group_id, |m| {
            if let Some(title) = title {
                m.title = title;
            }
            if topic.is_some() {
                m.topic = topic;
            }
        })?;
        self.audit(&group_id, EventKind::GroupUpdate, json!({"title": meta.title, "topic": meta.topic})).await;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_group_delete(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let confirm = args.get("confirm").and_then(Value::as_str).unwrap_or_default();
        if confirm != group_id {
            return Err(DaemonError::Core(cccc_core::CcccError::InvalidRequest(
                "confirm must equal group_id".into(),
            )));
        }
        self.audit(&group_id, EventKind::GroupDelete, json!({})).await;
        self.daemon.close_group(&group_id).await?;
        self.daemon.registry.delete(&group_id)?;
        Ok(json!({"deleted": true}))
    }

    async fn op_group_use(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::InvalidRequest("missing path".into())))?;
        let scope_key = args
            .get("scope_key")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        let meta = self.daemon.registry.update(&group_id, |m| {
            if !m.scopes.iter().any(|s| s.scope_key == scope_key) {
                m.scopes.push(Scope {
                    scope_key: scope_key.clone(),
                    root: path.into(),
                    git_remote: None,
                    label: None,
                });
            }
            m.active_scope_key = Some(scope_key.clone());
        })?;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_group_start(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        self.daemon.registry.update(&group_id, |m| m.running = true)?;
        self.daemon.open_group(&group_id).await?;
        Ok(json!({"started": true}))
    }

    async fn op_group_stop(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        self.daemon.registry.update(&group_id, |m| m.running = false)?;
        self.daemon.close_group(&group_id).await?;
        Ok(json!({"stopped": true}))
    }

    async fn op_group_set_state(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let state = match args.get("state").and_then(Value::as_str) {
            Some("active") => cccc_core::GroupState::Active,
            Some("idle") => cccc_core::GroupState::Idle,
            Some("paused") => cccc_core::GroupState::Paused,
            _ => {
                return Err(DaemonError::Core(cccc_core::CcccError::InvalidRequest(
                    "state must be active|idle|paused".into(),
                )))
            }
        };
        let meta = self.daemon.registry.set_state(&group_id, state)?;
        self.audit(&group_id, EventKind::GroupStateChanged, json!({"state": meta.state})).await;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_attach(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        self.daemon.open_group(&group_id).await?;
        let meta = self
            .daemon
            .registry
            .get(&group_id)
            .ok_or_else(|| DaemonError::GroupNotFound(group_id))?;
        Ok(serde_json::to_value(meta)?)
    }

    async fn op_actor_list(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actors = self
            .daemon
            .with_runtime(&group_id, |rt| Ok(rt.supervisor.list()))
            .await?;
        Ok(json!({"actors": actors}))
    }

    async fn op_actor_add(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let by = by_of(&args);
        let actor: Actor = serde_json::from_value(args.get("actor").cloned().unwrap_or(args.clone()))?;
        let supervisor = self.daemon.with_runtime(&group_id, |rt| Ok(rt.supervisor.clone())).await?;
        let added = supervisor.add(&by, actor.clone()).await?;
        self.daemon.registry.update(&group_id, |m| {
            m.actors.retain(|a| a.actor_id != actor.actor_id);
            m.actors.push(actor);
        })?;
        Ok(serde_json::to_value(added)?)
    }

    async fn op_actor_update(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor: Actor = serde_json::from_value(args.get("actor").cloned().unwrap_or(args.clone()))?;
        self.daemon.with_runtime(&group_id, |rt| {
            rt.supervisor.load(actor.clone());
            Ok(())
        }).await?;
        self.daemon.registry.update(&group_id, |m| {
            m.actors.retain(|a| a.actor_id != actor.actor_id);
            m.actors.push(actor);
        })?;
        Ok(json!({"updated": true}))
    }

    async fn op_actor_remove(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let by = by_of(&args);
        let supervisor = self.daemon.with_runtime(&group_id, |rt| Ok(rt.supervisor.clone())).await?;
        let event = supervisor.remove(&by, &actor_id).await?;
        self.daemon.registry.update(&group_id, |m| {
            m.actors.retain(|a| a.actor_id != actor_id);
        })?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_actor_start(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let by = by_of(&args);
        let meta = self
            .daemon
            .registry
            .get(&group_id)
            .ok_or_else(|| DaemonError::GroupNotFound(group_id.clone()))?;
        let env_private = {
            let guard = self.env_private.lock().await;
            guard.get(&(group_id.clone(), actor_id.clone())).cloned().unwrap_or_default()
        };
        let project_root = meta.project_root().map(|p| p.to_path_buf());
        let supervisor = self.daemon.with_runtime(&group_id, |rt| Ok(rt.supervisor.clone())).await?;
        let event = supervisor
            .start(&by, &actor_id, project_root.as_deref(), &env_private, LifecycleCause::User)
            .await?;
        let delivery = self.daemon.with_runtime(&group_id, |rt| Ok(rt.delivery.clone())).await?;
        delivery.replay_preamble(&actor_id).await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_actor_stop(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let by = by_of(&args);
        let supervisor = self.daemon.with_runtime(&group_id, |rt| Ok(rt.supervisor.clone())).await?;
        let event = supervisor.stop(&by, &actor_id, LifecycleCause::User).await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_actor_restart(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let by = by_of(&args);
        let meta = self
            .daemon
            .registry
            .get(&group_id)
            .ok_or_else(|| DaemonError::GroupNotFound(group_id.clone()))?;
        let env_private = {
            let guard = self.env_private.lock().await;
            guard.get(&(group_id.clone(), actor_id.clone())).cloned().unwrap_or_default()
        };
        let project_root = meta.project_root().map(|p| p.to_path_buf());
        let supervisor = self.daemon.with_runtime(&group_id, |rt| Ok(rt.supervisor.clone())).await?;
        let event = supervisor
            .restart(&by, &actor_id, project_root.as_deref(), &env_private)
            .await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_env_private_get_keys(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let guard = self.env_private.lock().await;
        let keys: Vec<&String> = guard
            .get(&(group_id, actor_id))
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        Ok(json!({"keys": keys}))
    }

    async fn op_env_private_update(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let mut guard = self.env_private.lock().await;
        let entry = guard.entry((group_id, actor_id)).or_default();
        if let Some(set) = args.get("set").and_then(Value::as_object) {
            for (k, v) in set {
                if let Some(v) = v.as_str() {
                    entry.insert(k.clone(), v.to_string());
                }
            }
        }
        if let Some(unset) = args.get("unset").and_then(Value::as_array) {
            for k in unset {
                if let Some(k) = k.as_str() {
                    entry.remove(k);
                }
            }
        }
        if args.get("clear").and_then(Value::as_bool).unwrap_or(false) {
            entry.clear();
        }
        Ok(json!({"updated": true}))
    }

    async fn op_send(&self, args: Value) -> DaemonResult<Value> {
        let parsed: SendArgs = serde_json::from_value(args)?;
        let delivery = self.daemon.with_runtime(&parsed.group_id, |rt| Ok(rt.delivery.clone())).await?;
        let by = parsed
            .by
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Principal::User);
        let event = delivery
            .submit(SubmitRequest {
                by,
                to: parsed.to,
                text: parsed.text,
                format: parse_format(parsed.format),
                reply_to: parsed.reply_to,
                quote_text: parsed.quote_text,
                priority: parse_priority(parsed.priority),
                attachments: parsed.attachments,
                client_id: parsed.client_id,
                scope_key: parsed.scope_key.unwrap_or_default(),
                relay: None,
                dst: None,
            })
            .await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_send_cross_group(&self, args: Value) -> DaemonResult<Value> {
        let src = args.get("src").and_then(Value::as_str).unwrap_or_default().to_string();
        let dst = args
            .get("dst")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::MissingGroupId))?
            .to_string();
        let by = by_of(&args);
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        let to: Vec<String> = args
            .get("to")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let src_delivery = self.daemon.with_runtime(&src, |rt| Ok(rt.delivery.clone())).await?;
        let src_event = src_delivery
            .submit(SubmitRequest {
                by: by.clone(),
                to: vec![],
                text: text.clone(),
                format: CoreMessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: None,
                dst: Some(DstRelay {
                    group_id: dst.clone(),
                    to: to.clone(),
                }),
            })
            .await?;

        let dst_delivery = self.daemon.with_runtime(&dst, |rt| Ok(rt.delivery.clone())).await?;
        let dst_event = dst_delivery
            .submit(SubmitRequest {
                by,
                to,
                text,
                format: CoreMessageFormat::Plain,
                reply_to: None,
                quote_text: None,
                priority: MessagePriority::Normal,
                attachments: vec![],
                client_id: None,
                scope_key: String::new(),
                relay: Some(RelayProvenance {
                    src_group_id: src,
                    src_event_id: src_event.id.clone(),
                }),
                dst: None,
            })
            .await?;
        Ok(serde_json::to_value(dst_event)?)
    }

    async fn op_chat_ack(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let event_id = args
            .get("event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::InvalidRequest("missing event_id".into())))?
            .to_string();
        let by = by_of(&args);

        let (ledger, inbox) = self
            .daemon
            .with_runtime(&group_id, |rt| Ok((rt.ledger.clone(), rt.inbox.clone())))
            .await?;
        let target = ledger.tail(None, None, Some(&[EventKind::ChatMessage])).await?
            .into_iter()
            .find(|e| e.id == event_id);
        let is_valid = target
            .as_ref()
            .map(|e| {
                e.data_as::<cccc_core::event::ChatMessageData>()
                    .map(|d| d.priority == MessagePriority::Attention)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        let outcome = inbox.ack(&by, &actor_id, &event_id, is_valid)?;
        let already = matches!(outcome, cccc_inbox::AckOutcome::AlreadyAcked);
        if already {
            return Ok(json!({"acked": true, "already": true, "event": Value::Null}));
        }
        let data = cccc_core::event::ChatAckData {
            actor_id: actor_id.clone(),
            event_id: event_id.clone(),
        };
        let partial = cccc_core::event::EventPartial {
            id: None,
            kind: EventKind::ChatAck,
            group_id,
            scope_key: String::new(),
            by,
            data: serde_json::to_value(data)?,
        };
        let event = ledger.append(partial).await?;
        Ok(json!({"acked": true, "already": false, "event": event}))
    }

    async fn op_inbox_list(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let (ledger, inbox, supervisor) = self
            .daemon
            .with_runtime(&group_id, |rt| Ok((rt.ledger.clone(), rt.inbox.clone(), rt.supervisor.clone())))
            .await?;
        let cursor = inbox.cursor(&actor_id);
        let since = cursor.map(|c| cccc_ledger::Cursor::Ts(c.last_read_ts));
        let all_chat = ledger.tail(since, None, Some(&[EventKind::ChatMessage])).await?;
        let unread: Vec<Value> = all_chat
            .into_iter()
            .filter(|e| {
                let Ok(data) = e.data_as::<cccc_core::event::ChatMessageData>() else { return false };
                let resolved = cccc_core::recipient::resolve(&data.to, supervisor.as_ref(), Some(&e.by.to_string()));
                resolved.actor_ids.iter().any(|id| id == &actor_id)
            })
            .map(|e| serde_json::to_value(e).unwrap())
            .collect();
        Ok(json!({"events": unread}))
    }

    async fn op_inbox_mark_read(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let event_id = args
            .get("event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::InvalidRequest("missing event_id".into())))?
            .to_string();
        let (ledger, inbox, supervisor) = self
            .daemon
            .with_runtime(&group_id, |rt| Ok((rt.ledger.clone(), rt.inbox.clone(), rt.supervisor.clone())))
            .await?;
        let event = ledger
            .tail(None, None, None)
            .await?
            .into_iter()
            .find(|e| e.id == event_id)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::EventNotFound(event_id.clone())))?;
        let addressed_to_actor = event.kind == EventKind::ChatMessage
            && event
                .data_as::<cccc_core::event::ChatMessageData>()
                .map(|data| {
                    let resolved =
                        cccc_core::recipient::resolve(&data.to, supervisor.as_ref(), Some(&event.by.to_string()));
                    resolved.actor_ids.iter().any(|id| id == &actor_id)
                })
                .unwrap_or(false);
        if !addressed_to_actor {
            return Err(DaemonError::Core(cccc_core::CcccError::InvalidRequest(format!(
                "event {event_id} is not a chat.message addressed to actor {actor_id}"
            ))));
        }
        let advanced = inbox.mark_read(&actor_id, &event.id, event.ts)?;
        if advanced {
            let data = cccc_core::event::ChatReadData {
                actor_id: actor_id.clone(),
                event_id: event.id.clone(),
            };
            let partial = cccc_core::event::EventPartial {
                id: None,
                kind: EventKind::ChatRead,
                group_id,
                scope_key: String::new(),
                by: Principal::Actor(actor_id),
                data: serde_json::to_value(data)?,
            };
            ledger.append(partial).await?;
        }
        Ok(json!({"advanced": advanced}))
    }

    async fn op_inbox_mark_all_read(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let (ledger, inbox) = self
            .daemon
            .with_runtime(&group_id, |rt| Ok((rt.ledger.clone(), rt.inbox.clone())))
            .await?;
        let all = ledger.tail(None, None, None).await?;
        if let Some(last) = all.last() {
            let advanced = inbox.mark_read(&actor_id, &last.id, last.ts)?;
            if advanced {
                let data = cccc_core::event::ChatReadData {
                    actor_id: actor_id.clone(),
                    event_id: last.id.clone(),
                };
                let partial = cccc_core::event::EventPartial {
                    id: None,
                    kind: EventKind::ChatRead,
                    group_id,
                    scope_key: String::new(),
                    by: Principal::Actor(actor_id),
                    data: serde_json::to_value(data)?,
                };
                ledger.append(partial).await?;
            }
        }
        Ok(json!({"advanced": true}))
    }

    async fn op_system_notify(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let to: Vec<String> = args
            .get("to")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let notify_kind = args.get("notify_kind").and_then(Value::as_str).unwrap_or("custom");
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        let requires_ack = args.get("requires_ack").and_then(Value::as_bool).unwrap_or(false);
        let delivery = self.daemon.with_runtime(&group_id, |rt| Ok(rt.delivery.clone())).await?;
        let event = delivery.notify(to, notify_kind, text, requires_ack).await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_notify_ack(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let notify_event_id = args
            .get("notify_event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Core(cccc_core::CcccError::InvalidRequest("missing notify_event_id".into())))?
            .to_string();
        let by = by_of(&args);
        let ledger = self.daemon.with_runtime(&group_id, |rt| Ok(rt.ledger.clone())).await?;
        let data = cccc_core::event::SystemNotifyAckData { actor_id, notify_event_id };
        let partial = cccc_core::event::EventPartial {
            id: None,
            kind: EventKind::SystemNotifyAck,
            group_id,
            scope_key: String::new(),
            by,
            data: serde_json::to_value(data)?,
        };
        let event = ledger.append(partial).await?;
        Ok(serde_json::to_value(event)?)
    }

    async fn op_terminal_tail(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        let output = self
            .daemon
            .with_runtime(&group_id, |rt| Ok(rt.supervisor.drain_output(&actor_id)?))
            .await?;
        Ok(json!({"output": output}))
    }

    async fn op_terminal_clear(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let actor_id = actor_id_of(&args)?;
        self.daemon
            .with_runtime(&group_id, |rt| Ok(rt.supervisor.drain_output(&actor_id)?))
            .await?;
        Ok(json!({"cleared": true}))
    }

    async fn op_ledger_snapshot(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let all = self
            .daemon
            .with_runtime(&group_id, |rt| Ok(rt.ledger.clone()))
            .await?
            .tail(None, None, None)
            .await?;
        let last = all.last();
        Ok(json!({
            "group_id": group_id,
            "event_count": all.len(),
            "last_event_id": last.map(|e| e.id.clone()),
        }))
    }

    async fn op_ledger_compact(&self, args: Value) -> DaemonResult<Value> {
        let group_id = group_id_of(&args)?;
        let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);
        let (ledger, inbox, supervisor) = self
            .daemon
            .with_runtime(&group_id, |rt| Ok((rt.ledger.clone(), rt.inbox.clone(), rt.supervisor.clone())))
            .await?;
        let actor_ids: Vec<String> = supervisor.list().into_iter().map(|a| a.actor_id).collect();
        let watermark = inbox
            .safe_watermark(&actor_ids)
            .map(|c| cccc_ledger::Cursor::Ts(c.last_read_ts))
            .ok_or_else(|| {
                DaemonError::Core(cccc_core::CcccError::InvalidRequest(
                    "at least one actor has no read cursor yet".into(),
                ))
            })?;
        let home = self.daemon.home.clone();
        let meta_path = home.compaction_meta_json(&group_id);
        if !force {
            let meta = cccc_ledger::CompactionMetadata::read(&meta_path)?;
            let active_size = ledger.active_size_bytes()?;
            let eligible = cccc_ledger::compaction::is_eligible(
                active_size,
                self.daemon.config.ledger.max_active_bytes,
                self.daemon.config.ledger.min_interval_seconds,
                chrono::Utc::now(),
                &cccc_ledger::CompactionInputs {
                    safe_watermark: Some(watermark.clone()),
                    last_compaction_at: meta.last_compacted_at,
                },
            );
            if !eligible {
                return Ok(json!({"compacted": false}));
            }
        }
        let meta = cccc_ledger::compaction::perform_compaction(
            &ledger,
            &meta_path,
            &home.snapshots_dir(&group_id),
            &watermark,
            self.daemon.config.ledger.tail_keep,
        )
        .await?;
        Ok(json!({"compacted": true, "metadata": meta}))
    }
}

/// Bridge a handful of `OpHandler` trait methods (kept synchronous by
/// `cccc-ipc` so the transport layer never depends on a particular async
/// runtime) onto the daemon's async runtime map.
fn block_on_runtime<T>(fut: impl std::future::Future<Output = DaemonResult<T>>) -> DaemonResult<T> {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
}
