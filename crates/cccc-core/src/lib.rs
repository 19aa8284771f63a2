pub mod blob;
pub mod config;
pub mod error;
pub mod event;
pub mod group;
pub mod home;
pub mod principal;
pub mod recipient;

pub use error::{CcccError, Result};
pub use event::{Event, EventKind, EventPartial};
pub use group::{GroupState, GroupStateSource};
pub use principal::Principal;
