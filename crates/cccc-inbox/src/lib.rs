pub mod engine;
pub mod error;
pub mod state;

pub use engine::{AckOutcome, InboxEngine};
pub use error::{InboxError, Result};
pub use state::{AttentionFile, CursorsFile, ReadCursor};
