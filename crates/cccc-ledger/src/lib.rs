pub mod blob_store;
pub mod compaction;
pub mod cursor;
pub mod error;
pub mod snapshot;
pub mod store;

pub use blob_store::BlobStore;
pub use compaction::{CompactionInputs, CompactionMetadata};
pub use cursor::Cursor;
pub use error::{LedgerError, Result};
pub use snapshot::Snapshot;
pub use store::{Ledger, LedgerObserver, SearchFilters, WindowResult};
