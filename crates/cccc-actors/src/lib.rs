pub mod error;
pub mod pidfile;
pub mod runner;
pub mod supervisor;
pub mod types;

pub use error::{ActorError, Result};
pub use pidfile::PidRecord;
pub use runner::{HeadlessRunner, PtyRunner, Runner, SpawnSpec};
pub use supervisor::ActorSupervisor;
pub use types::{Actor, ActorRole, LifecycleState, RunnerKind};
