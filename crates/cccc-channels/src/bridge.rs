use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, OutboundMessage},
};

/// Interface every IM bridge adapter implements (spec §6, minimal contract).
/// The kernel never parses a platform's wire format itself — it only relays
/// ledger events out through this trait. Inbound platform messages go the
/// other way: an adapter hands the kernel an `InboundMessage` and
/// `ChannelManager::handle_inbound` resolves it against subscription state
/// to the groups that should receive it.
#[async_trait]
pub trait ChannelBridge: Send + Sync {
    /// Stable lowercase identifier (e.g. `"telegram"`); unique within a
    /// [`ChannelManager`](crate::manager::ChannelManager).
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), ChannelError>;

    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver one outbound message. `&self` so a connected adapter can
    /// send concurrently without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    fn status(&self) -> ChannelStatus;
}
