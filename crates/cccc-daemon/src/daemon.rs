//! Daemon orchestrator: owns the group registry, the open runtimes, the
//! channel bridge manager, and the recovery/compaction coordinator (C9).

use std::collections::HashMap;
use std::sync::Arc;

use cccc_core::config::CcccConfig;
use cccc_core::event::LifecycleCause;
use cccc_core::home::RuntimeHome;
use cccc_core::principal::Principal;
use cccc_ledger::compaction::{self, CompactionInputs, CompactionMetadata};
use cccc_ledger::Cursor;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::group::{GroupRegistry, GroupStateHandle};
use crate::runtime::GroupRuntime;

pub struct Daemon {
    pub home: RuntimeHome,
    pub config: CcccConfig,
    pub registry: Arc<GroupRegistry>,
    pub channels: Arc<cccc_channels::ChannelManager>,
    runtimes: Mutex<HashMap<String, GroupRuntime>>,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    /// Build the daemon and run C9 startup recovery: open every group with
    /// `running == true`, reconcile pidfiles, autostart enabled actors
    /// (spec §5 step 1-2).
    pub async fn start(home: RuntimeHome, config: CcccConfig) -> Result<Arc<Self>> {
        let registry = Arc::new(GroupRegistry::open(home.clone())?);
        let channels = Arc::new(cccc_channels::ChannelManager::new(home.clone()));
        let (shutdown, _) = watch::channel(false);
        let daemon = Arc::new(Self {
            home,
            config,
            registry,
            channels,
            runtimes: Mutex::new(HashMap::new()),
            shutdown,
        });
        daemon.recover().await?;
        Ok(daemon)
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    #[instrument(skip(self))]
    async fn recover(&self) -> Result<()> {
        let groups = self.registry.list();
        for meta in groups {
            if !meta.running {
                continue;
            }
            info!(group_id = %meta.group_id, "recovering running group");
            self.open_group(&meta.group_id).await?;
            let runtimes = self.runtimes.lock().await;
            let runtime = runtimes.get(&meta.group_id).expect("just opened");
            runtime.supervisor.reconcile_pidfiles()?;
            for actor in &meta.actors {
                if actor.enabled && !runtime.supervisor.is_running(&actor.actor_id) {
                    let env_private = HashMap::new();
                    if let Err(e) = runtime
                        .supervisor
                        .start(
                            &Principal::System,
                            &actor.actor_id,
                            meta.project_root(),
                            &env_private,
                            LifecycleCause::User,
                        )
                        .await
                    {
                        warn!(group_id = %meta.group_id, actor_id = %actor.actor_id, error = %e, "autostart failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Open a group's runtime if not already open (idempotent). Seeds the
    /// freshly-built supervisor with every persisted actor definition —
    /// the ledger's `actor.add` events carry only `{actor_id, cause}`, so
    /// `group.yaml` is the only durable source for the full definition.
    pub async fn open_group(&self, group_id: &str) -> Result<()> {
        let mut runtimes = self.runtimes.lock().await;
        if runtimes.contains_key(group_id) {
            return Ok(());
        }
        let state_handle = Arc::new(GroupStateHandle::new(self.registry.clone(), group_id));
        let runtime = GroupRuntime::open(&self.home, group_id, &self.config, state_handle).await?;
        if let Some(meta) = self.registry.get(group_id) {
            for actor in meta.actors {
                runtime.supervisor.load(actor);
            }
        }
        runtimes.insert(group_id.to_string(), runtime);
        Ok(())
    }

    pub async fn close_group(&self, group_id: &str) -> Result<()> {
        let runtime = {
            let mut runtimes = self.runtimes.lock().await;
            runtimes.remove(group_id)
        };
        if let Some(runtime) = runtime {
            runtime.close().await;
        }
        Ok(())
    }

    pub async fn is_open(&self, group_id: &str) -> bool {
        self.runtimes.lock().await.contains_key(group_id)
    }

    pub async fn with_runtime<T>(
        &self,
        group_id: &str,
        f: impl FnOnce(&GroupRuntime) -> Result<T>,
    ) -> Result<T> {
        let runtimes = self.runtimes.lock().await;
        let runtime = runtimes
            .get(group_id)
            .ok_or_else(|| crate::error::DaemonError::GroupNotFound(group_id.to_string()))?;
        f(runtime)
    }

    /// Periodic tick: scan every open group's ledger for compaction
    /// eligibility and run it when due (spec §4.9, C9).
    pub async fn run_compaction_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.ledger.compaction_check_interval_seconds);
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.compaction_pass().await {
                        error!(error = %e, "compaction pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn compaction_pass(&self) -> Result<()> {
        let group_ids: Vec<String> = self.runtimes.lock().await.keys().cloned().collect();
        for group_id in group_ids {
            if let Err(e) = self.compact_one(&group_id).await {
                warn!(group_id, error = %e, "compaction failed for group");
            }
        }
        Ok(())
    }

    async fn compact_one(&self, group_id: &str) -> Result<()> {
        let runtimes = self.runtimes.lock().await;
        let runtime = match runtimes.get(group_id) {
            Some(r) => r,
            None => return Ok(()),
        };
        let active_size = runtime.ledger.active_size_bytes()?;
        let meta_path = self.home.compaction_meta_json(group_id);
        let meta = CompactionMetadata::read(&meta_path)?;

        let actor_ids: Vec<String> = runtime.supervisor.list().iter().map(|a| a.actor_id.clone()).collect();
        let safe_watermark = runtime
            .inbox
            .safe_watermark(&actor_ids)
            .map(|cursor| Cursor::Ts(cursor.last_read_ts));

        let inputs = CompactionInputs {
            safe_watermark: safe_watermark.clone(),
            last_compaction_at: meta.last_compacted_at,
        };
        let eligible = compaction::is_eligible(
            active_size,
            self.config.ledger.max_active_bytes,
            self.config.ledger.min_interval_seconds,
            chrono::Utc::now(),
            &inputs,
        );
        if !eligible {
            return Ok(());
        }
        let Some(watermark) = safe_watermark else {
            return Ok(());
        };
        compaction::perform_compaction(
            &runtime.ledger,
            &meta_path,
            &self.home.snapshots_dir(group_id),
            &watermark,
            self.config.ledger.tail_keep,
        )
        .await?;
        Ok(())
    }

    /// Broadcast shutdown to every per-group automation loop, the
    /// compaction loop, and the IPC accept loop, then drain group runtimes.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let group_ids: Vec<String> = self.runtimes.lock().await.keys().cloned().collect();
        for group_id in group_ids {
            let _ = self.close_group(&group_id).await;
        }
        self.channels.disconnect_all().await;
    }
}
