//! Best-effort injection of delivered messages into a running actor's
//! terminal (spec §4.5).
//!
//! Mirrors the drain-thread shape of `cccc_actors::runner`: one background
//! task per actor pulls from a bounded FIFO and paces writes by
//! `delivery.min_interval_seconds`, so a burst of chat traffic never floods
//! an actor's stdin faster than it can keep up.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use cccc_actors::ActorSupervisor;
use cccc_core::config::DeliveryConfig;
use cccc_core::event::{EventKind, EventPartial, SystemNotifyData};
use cccc_core::principal::Principal;
use cccc_ledger::Ledger;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::error::Result;

/// Above this many bytes, the canonical form becomes a header plus a
/// pointer to a spill file instead of the inline text (spec §4.5).
const INLINE_MAX_BYTES: usize = 400;

fn canonical_header(by: &str, recipient_label: &str, body: &str) -> String {
    format!("[cccc] {by} \u{2192} {recipient_label}: {body}")
}

/// The submit keystroke sent after a paste, per actor runtime (spec §4.5:
/// "configurable per runtime: Enter, Ctrl-J, or none").
fn submit_sequence(runtime: &str) -> &'static [u8] {
    match runtime {
        "raw" | "none" => b"",
        "ctrl-j" => b"\n",
        _ => b"\r",
    }
}

struct ActorQueue {
    items: StdMutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    last_injected: StdMutex<Option<Instant>>,
}

pub struct InjectionPipeline {
    group_id: String,
    config: DeliveryConfig,
    supervisor: Arc<ActorSupervisor>,
    ledger: Arc<Ledger>,
    work_dir: PathBuf,
    queues: StdMutex<HashMap<String, Arc<ActorQueue>>>,
    spill_counter: AtomicU64,
}

impl InjectionPipeline {
    pub fn new(
        group_id: impl Into<String>,
        config: DeliveryConfig,
        supervisor: Arc<ActorSupervisor>,
        ledger: Arc<Ledger>,
        work_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            group_id: group_id.into(),
            config,
            supervisor,
            ledger,
            work_dir,
            queues: StdMutex::new(HashMap::new()),
            spill_counter: AtomicU64::new(0),
        })
    }

    /// Build the canonical payload and queue it for injection into
    /// `actor_id`. Never blocks the caller beyond the queue push itself.
    #[instrument(skip(self, text), fields(group_id = %self.group_id, actor_id))]
    pub async fn enqueue(
        self: &Arc<Self>,
        actor_id: &str,
        by: &str,
        recipient_label: &str,
        text: &str,
        runtime: &str,
    ) -> Result<()> {
        let bracketed = self.supervisor.supports_bracketed_paste(actor_id);
        let payload = self.build_payload(actor_id, by, recipient_label, text, runtime, bracketed)?;

        let queue = self.queue_for(actor_id);
        let dropped = {
            let mut items = queue.items.lock().unwrap();
            let was_full = items.len() >= self.config.queue_depth;
            if was_full {
                items.pop_front();
            }
            items.push_back(payload);
            was_full
        };
        if dropped {
            warn!("injection queue full, dropped oldest pending message");
            self.notify_dropped(actor_id).await?;
        }
        queue.notify.notify_one();
        Ok(())
    }

    fn build_payload(
        &self,
        actor_id: &str,
        by: &str,
        recipient_label: &str,
        text: &str,
        runtime: &str,
        bracketed: bool,
    ) -> Result<Vec<u8>> {
        let submit = submit_sequence(runtime);
        if bracketed {
            let inline = canonical_header(by, recipient_label, text);
            let body = if inline.len() <= INLINE_MAX_BYTES {
                inline
            } else {
                let path = self.spill(actor_id, text)?;
                canonical_header(by, recipient_label, &format!("see {}", path.display()))
            };
            let mut out = Vec::with_capacity(body.len() + submit.len() + 12);
            out.extend_from_slice(b"\x1b[200~");
            out.extend_from_slice(body.as_bytes());
            out.extend_from_slice(b"\x1b[201~");
            out.extend_from_slice(submit);
            Ok(out)
        } else {
            // No bracketed-paste support: always spill, never inject raw
            // multi-character text directly (avoids partial-line execution).
            let path = self.spill(actor_id, text)?;
            let header = canonical_header(by, recipient_label, &format!("see {}", path.display()));
            let mut out = header.into_bytes();
            out.extend_from_slice(submit);
            Ok(out)
        }
    }

    fn spill(&self, actor_id: &str, text: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.work_dir)?;
        let n = self.spill_counter.fetch_add(1, Ordering::Relaxed);
        let path = self.work_dir.join(format!("{actor_id}-{n}.txt"));
        std::fs::write(&path, text)?;
        Ok(path)
    }

    fn queue_for(self: &Arc<Self>, actor_id: &str) -> Arc<ActorQueue> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(q) = queues.get(actor_id) {
            return Arc::clone(q);
        }
        let queue = Arc::new(ActorQueue {
            items: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
            last_injected: StdMutex::new(None),
        });
        queues.insert(actor_id.to_string(), Arc::clone(&queue));
        spawn_worker(Arc::clone(self), actor_id.to_string(), Arc::clone(&queue));
        queue
    }

    async fn notify_dropped(&self, actor_id: &str) -> Result<()> {
        let data = SystemNotifyData {
            notify_kind: "delivery_dropped".to_string(),
            to: vec![actor_id.to_string()],
            text: format!("injection queue overflow for {actor_id}, oldest pending message dropped"),
            requires_ack: false,
        };
        let partial = EventPartial {
            id: None,
            kind: EventKind::SystemNotify,
            group_id: self.group_id.clone(),
            scope_key: String::new(),
            by: Principal::System,
            data: serde_json::to_value(data)?,
        };
        self.ledger.append(partial).await?;
        Ok(())
    }
}

fn spawn_worker(pipeline: Arc<InjectionPipeline>, actor_id: String, queue: Arc<ActorQueue>) {
    tokio::spawn(async move {
        let min_interval = Duration::from_secs(pipeline.config.min_interval_seconds.max(1));
        loop {
            queue.notify.notified().await;
            loop {
                let next = {
                    let mut items = queue.items.lock().unwrap();
                    items.pop_front()
                };
                let Some(payload) = next else { break };

                let wait = {
                    let last = *queue.last_injected.lock().unwrap();
                    match last {
                        Some(t) if t.elapsed() < min_interval => min_interval - t.elapsed(),
                        _ => Duration::ZERO,
                    }
                };
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }

                let timeout = Duration::from_millis(pipeline.config.inject_timeout_ms);
                let sup = Arc::clone(&pipeline.supervisor);
                let actor_id_for_blocking = actor_id.clone();
                let join = tokio::task::spawn_blocking(move || sup.inject(&actor_id_for_blocking, &payload));
                match tokio::time::timeout(timeout, join).await {
                    Ok(Ok(Ok(()))) => debug!(actor_id = %actor_id, "injected"),
                    Ok(Ok(Err(e))) => warn!(actor_id = %actor_id, error = %e, "injection failed, message already durable"),
                    Ok(Err(e)) => warn!(actor_id = %actor_id, error = %e, "injection task panicked"),
                    Err(_) => warn!(actor_id = %actor_id, "injection timed out"),
                }
                *queue.last_injected.lock().unwrap() = Some(Instant::now());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_stays_inline() {
        let header = canonical_header("user", "@all", "hello");
        assert!(header.len() <= INLINE_MAX_BYTES);
        assert_eq!(header, "[cccc] user \u{2192} @all: hello");
    }

    #[test]
    fn submit_sequence_defaults_to_enter() {
        assert_eq!(submit_sequence("claude"), b"\r");
        assert_eq!(submit_sequence("raw"), b"" as &[u8]);
    }
}
