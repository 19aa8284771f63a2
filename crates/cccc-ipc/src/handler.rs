//! The seam between transport (this crate) and the daemon's actual state.
//!
//! `cccc-ipc` never touches a `Ledger`/`ActorSupervisor`/`Group` directly —
//! the daemon binary implements this trait once, wiring every op to the
//! right per-group component, the same way `cccc_core::recipient`'s
//! `ActorDirectory` keeps the recipient grammar decoupled from the actor
//! registry that implements it.

use async_trait::async_trait;
use cccc_bus::Subscription;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait OpHandler: Send + Sync {
    /// Dispatch a single request/response op from the catalog (spec §6).
    async fn call(&self, op: &str, args: Value) -> Result<Value>;

    /// Open an event-stream subscription (`events_stream` upgrade, spec
    /// §4.7/§4.8). `kinds = None` means no filter.
    fn subscribe_events(&self, group_id: &str, kinds: Option<Vec<String>>) -> Result<Subscription>;

    /// Poll an actor's buffered terminal output (`term_attach` outbound
    /// direction).
    fn drain_terminal(&self, group_id: &str, actor_id: &str) -> Result<String>;

    /// Write bytes to an actor's stdin (`term_attach` inbound direction).
    fn write_terminal(&self, group_id: &str, actor_id: &str, bytes: &[u8]) -> Result<()>;

    /// Resize an actor's PTY (`term_resize`, also usable mid-attach).
    fn resize_terminal(&self, group_id: &str, actor_id: &str, cols: u16, rows: u16) -> Result<()>;
}
