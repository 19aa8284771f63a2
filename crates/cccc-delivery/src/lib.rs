pub mod error;
pub mod idempotency;
pub mod injection;
pub mod pipeline;

pub use error::{DeliveryError, Result};
pub use idempotency::IdempotencyCache;
pub use injection::InjectionPipeline;
pub use pipeline::{DeliveryPipeline, DstRelay, RelayProvenance, SubmitRequest};
