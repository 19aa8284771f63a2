use std::collections::HashMap;

use cccc_core::event::EventKind;
use cccc_core::home::RuntimeHome;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{
    bridge::ChannelBridge,
    error::{ChannelError, Result},
    types::{ChannelStatus, InboundMessage, MessageFormat, OutboundMessage, Subscription, SubscriptionFile},
};

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;
const MAX_ATTEMPTS: u32 = 10;

/// Registry of IM bridge adapters plus the per-group subscription state the
/// kernel persists on their behalf (spec §4.8/§6: not ledger events).
pub struct ChannelManager {
    home: RuntimeHome,
    bridges: Mutex<HashMap<String, Box<dyn ChannelBridge>>>,
}

impl ChannelManager {
    pub fn new(home: RuntimeHome) -> Self {
        Self {
            home,
            bridges: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, bridge: Box<dyn ChannelBridge>) {
        let name = bridge.name().to_string();
        info!(channel = %name, "registering channel bridge");
        self.bridges.lock().await.insert(name, bridge);
    }

    pub async fn connect_all(&self) {
        let names: Vec<String> = self.bridges.lock().await.keys().cloned().collect();
        for name in names {
            info!(channel = %name, "connecting channel bridge");
            if let Err(e) = self.connect_with_backoff(&name).await {
                error!(channel = %name, error = %e, "failed to connect channel bridge after retries");
            }
        }
    }

    pub async fn disconnect_all(&self) {
        let mut bridges = self.bridges.lock().await;
        for (name, bridge) in bridges.iter_mut() {
            if let Err(e) = bridge.disconnect().await {
                warn!(channel = %name, error = %e, "error while disconnecting channel bridge");
            }
        }
    }

    pub async fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let bridges = self.bridges.lock().await;
        let mut result: Vec<(String, ChannelStatus)> =
            bridges.iter().map(|(name, b)| (name.clone(), b.status())).collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Subscribe `chat_id` on `channel` to `group_id`'s stream events,
    /// writing `state/channels.json` atomically.
    pub fn subscribe(
        &self,
        group_id: &str,
        channel: &str,
        chat_id: &str,
        kinds: Option<Vec<EventKind>>,
    ) -> Result<()> {
        let mut file = self.load(group_id)?;
        file.subscriptions
            .retain(|s| !(s.channel == channel && s.chat_id == chat_id));
        file.subscriptions.push(Subscription {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            kinds,
        });
        self.save(group_id, &file)
    }

    pub fn unsubscribe(&self, group_id: &str, channel: &str, chat_id: &str) -> Result<()> {
        let mut file = self.load(group_id)?;
        file.subscriptions
            .retain(|s| !(s.channel == channel && s.chat_id == chat_id));
        self.save(group_id, &file)
    }

    pub fn subscriptions(&self, group_id: &str) -> Result<Vec<Subscription>> {
        Ok(self.load(group_id)?.subscriptions)
    }

    /// Relay one outbound item to every subscriber of `group_id` interested
    /// in `kind`. Errors on individual bridges are logged, not propagated —
    /// one dead bridge must not block the rest of the fan-out.
    pub async fn relay(&self, group_id: &str, kind: &EventKind, content: &str) -> Result<()> {
        let subs: Vec<Subscription> = self
            .load(group_id)?
            .subscriptions
            .into_iter()
            .filter(|s| s.matches(kind))
            .collect();
        if subs.is_empty() {
            return Ok(());
        }
        let bridges = self.bridges.lock().await;
        for sub in subs {
            let Some(bridge) = bridges.get(&sub.channel) else {
                continue;
            };
            let msg = OutboundMessage {
                channel: sub.channel.clone(),
                recipient_id: sub.chat_id.clone(),
                content: content.to_string(),
                format: MessageFormat::PlainText,
            };
            if let Err(e) = bridge.send(&msg).await {
                warn!(channel = %sub.channel, chat_id = %sub.chat_id, error = %e, "channel relay failed");
            }
        }
        Ok(())
    }

    /// Resolve an inbound platform message to the groups that should receive
    /// it: every candidate group (usually every open group) whose
    /// subscription state carries a `(channel, chat_id)` pair matching the
    /// message's sender. The caller is responsible for turning a match into
    /// a `chat.message` submitted through that group's delivery pipeline
    /// (spec §6: default inbound `by` is `user`); this crate has no access
    /// to the pipeline itself.
    pub fn handle_inbound(&self, group_ids: &[String], msg: &InboundMessage) -> Result<Vec<String>> {
        let mut matched = Vec::new();
        for group_id in group_ids {
            let file = self.load(group_id)?;
            if file
                .subscriptions
                .iter()
                .any(|s| s.channel == msg.channel && s.chat_id == msg.sender_id)
            {
                matched.push(group_id.clone());
            }
        }
        Ok(matched)
    }

    fn load(&self, group_id: &str) -> Result<SubscriptionFile> {
        let path = self.home.channels_json(group_id);
        if !path.exists() {
            return Ok(SubscriptionFile::default());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, group_id: &str, file: &SubscriptionFile) -> Result<()> {
        let path = self.home.channels_json(group_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Schedule: 5s -> 10s -> 20s -> ... -> 300s (cap), up to
    /// [`MAX_ATTEMPTS`] tries before giving up on one bridge.
    async fn connect_with_backoff(&self, name: &str) -> Result<()> {
        let mut delay_secs = BACKOFF_BASE_SECS;
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = {
                let mut bridges = self.bridges.lock().await;
                let bridge = bridges
                    .get_mut(name)
                    .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
                bridge.connect().await
            };
            match outcome {
                Ok(()) => {
                    info!(channel = %name, attempt, "channel bridge connected");
                    return Ok(());
                }
                Err(e) if attempt == MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        channel = %name,
                        attempt,
                        max = MAX_ATTEMPTS,
                        error = %e,
                        retry_after_secs = delay_secs,
                        "channel bridge connect failed, retrying with backoff"
                    );
                    sleep(Duration::from_secs(delay_secs)).await;
                    delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
                }
            }
        }
        unreachable!("backoff loop exited without returning")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyBridge {
        name: String,
        fail_times: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    #[async_trait::async_trait]
    impl ChannelBridge for FlakyBridge {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&mut self) -> std::result::Result<(), ChannelError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(ChannelError::Adapter("simulated failure".into()));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        async fn send(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
            self.sent.lock().await.push(msg.clone());
            Ok(())
        }

        fn status(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    #[tokio::test]
    async fn subscribe_then_relay_reaches_matching_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        home.ensure_group_dirs("grp").unwrap();
        let manager = ChannelManager::new(home);

        let sent = Arc::new(Mutex::new(Vec::new()));
        manager
            .register(Box::new(FlakyBridge {
                name: "telegram".to_string(),
                fail_times: Arc::new(AtomicUsize::new(0)),
                sent: sent.clone(),
            }))
            .await;

        manager
            .subscribe("grp", "telegram", "chat-1", Some(vec![EventKind::ChatMessage]))
            .unwrap();

        manager
            .relay("grp", &EventKind::ChatMessage, "hello")
            .await
            .unwrap();
        manager
            .relay("grp", &EventKind::ActorExit, "should not relay")
            .await
            .unwrap();

        let sent = sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient_id, "chat-1");
    }

    #[tokio::test]
    async fn handle_inbound_matches_only_subscribed_group() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        home.ensure_group_dirs("grp-a").unwrap();
        home.ensure_group_dirs("grp-b").unwrap();
        let manager = ChannelManager::new(home);

        manager.subscribe("grp-a", "telegram", "chat-1", None).unwrap();

        let msg = InboundMessage {
            channel: "telegram".to_string(),
            sender_id: "chat-1".to_string(),
            sender_name: None,
            content: "hi".to_string(),
            timestamp: chrono::Utc::now(),
            raw_payload: None,
        };
        let matched = manager
            .handle_inbound(&["grp-a".to_string(), "grp-b".to_string()], &msg)
            .unwrap();
        assert_eq!(matched, vec!["grp-a".to_string()]);

        let unrelated = InboundMessage {
            channel: "telegram".to_string(),
            sender_id: "chat-2".to_string(),
            ..msg
        };
        let matched = manager
            .handle_inbound(&["grp-a".to_string(), "grp-b".to_string()], &unrelated)
            .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn connect_with_backoff_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let home = RuntimeHome::new(dir.path());
        let manager = ChannelManager::new(home);
        manager
            .register(Box::new(FlakyBridge {
                name: "discord".to_string(),
                fail_times: Arc::new(AtomicUsize::new(1)),
                sent: Arc::new(Mutex::new(Vec::new())),
            }))
            .await;

        manager.connect_with_backoff("discord").await.unwrap();
    }
}
