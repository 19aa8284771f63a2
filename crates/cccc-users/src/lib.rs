pub mod error;
pub mod permissions;

pub use error::{Result, UserError};
pub use permissions::{ActorAction, ActorRole, PermissionCheck, PermissionChecker};
