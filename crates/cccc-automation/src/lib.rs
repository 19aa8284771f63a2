pub mod engine;
pub mod error;
pub mod state;

pub use engine::AutomationEngine;
pub use error::{AutomationError, Result};
pub use state::{ActorAutomationState, AutomationState};
