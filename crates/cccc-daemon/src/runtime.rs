//! Per-group runtime bundle: one [`GroupRuntime`] is constructed when a
//! group is opened and torn down (automation loop joined, ledger file lock
//! released by drop) when it is closed or the daemon shuts down.

use std::sync::Arc;

use cccc_actors::ActorSupervisor;
use cccc_bus::EventBus;
use cccc_core::config::CcccConfig;
use cccc_core::home::RuntimeHome;
use cccc_delivery::DeliveryPipeline;
use cccc_inbox::InboxEngine;
use cccc_ledger::Ledger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::Result;
use crate::group::GroupStateHandle;

pub struct GroupRuntime {
    pub group_id: String,
    pub ledger: Arc<Ledger>,
    pub bus: Arc<EventBus>,
    pub inbox: Arc<InboxEngine>,
    pub supervisor: Arc<ActorSupervisor>,
    pub delivery: Arc<DeliveryPipeline>,
    automation_shutdown: watch::Sender<bool>,
    automation_task: Option<JoinHandle<()>>,
}

impl GroupRuntime {
    /// Open every per-group component and spawn the automation loop
    /// (spec §5: one runtime per open group, owned by the daemon).
    pub async fn open(
        home: &RuntimeHome,
        group_id: &str,
        config: &CcccConfig,
        group_state: Arc<GroupStateHandle>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new(group_id));
        let ledger = Arc::new(Ledger::open(
            home,
            group_id,
            config.ledger.clone(),
            Some(bus.clone() as Arc<dyn cccc_ledger::LedgerObserver>),
        )?);
        let inbox = Arc::new(InboxEngine::open(home, group_id)?);
        if inbox.rebuilt_on_open() {
            let notify = cccc_core::event::SystemNotifyData {
                notify_kind: "info".to_string(),
                to: Vec::new(),
                text: "cursors/attention state was missing or corrupt, rebuilt from a ledger scan".to_string(),
                requires_ack: false,
            };
            let partial = cccc_core::event::EventPartial {
                id: None,
                kind: cccc_core::event::EventKind::SystemNotify,
                group_id: group_id.to_string(),
                scope_key: String::new(),
                by: cccc_core::principal::Principal::System,
                data: serde_json::to_value(&notify)?,
            };
            if let Err(e) = ledger.append(partial).await {
                tracing::warn!(group_id, error = %e, "failed to record inbox-rebuild notice");
            }
        }
        let supervisor = Arc::new(ActorSupervisor::new(home.clone(), group_id, ledger.clone()));
        let delivery = Arc::new(DeliveryPipeline::new(
            home,
            group_id,
            ledger.clone(),
            inbox.clone(),
            supervisor.clone(),
            config.delivery.clone(),
            group_state.clone() as Arc<dyn cccc_core::GroupStateSource>,
        ));

        let automation = Arc::new(cccc_automation::AutomationEngine::new(
            group_id,
            config.automation.clone(),
            ledger.clone(),
            inbox.clone(),
            supervisor.clone(),
            delivery.clone(),
            group_state as Arc<dyn cccc_core::GroupStateSource>,
        ));
        let (automation_shutdown, rx) = watch::channel(false);
        let automation_task = tokio::spawn(automation.run(rx));

        info!(group_id, "group runtime opened");
        Ok(Self {
            group_id: group_id.to_string(),
            ledger,
            bus,
            inbox,
            supervisor,
            delivery,
            automation_shutdown,
            automation_task: Some(automation_task),
        })
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Stop the automation loop and wait for it to exit. The ledger's
    /// advisory file lock releases when `self.ledger` is dropped.
    pub async fn close(mut self) {
        let _ = self.automation_shutdown.send(true);
        if let Some(task) = self.automation_task.take() {
            let _ = task.await;
        }
        info!(group_id = %self.group_id, "group runtime closed");
    }
}
