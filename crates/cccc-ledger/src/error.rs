use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("event not found: {0}")]
    NotFound(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<LedgerError> for cccc_core::CcccError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Invariant(m) => cccc_core::CcccError::InvalidRequest(m),
            LedgerError::NotFound(id) => cccc_core::CcccError::EventNotFound(id),
            LedgerError::Resource(m) => cccc_core::CcccError::Resource(m),
            LedgerError::Serialization(e) => cccc_core::CcccError::Serialization(e),
            LedgerError::Io(e) => cccc_core::CcccError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
