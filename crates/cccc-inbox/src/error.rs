use thiserror::Error;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("actor not found: {0}")]
    ActorNotFound(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<InboxError> for cccc_core::CcccError {
    fn from(e: InboxError) -> Self {
        match e {
            InboxError::Invariant(m) => cccc_core::CcccError::InvalidRequest(m),
            InboxError::PermissionDenied(m) => cccc_core::CcccError::PermissionDenied(m),
            InboxError::ActorNotFound(id) => cccc_core::CcccError::ActorNotFound(id),
            InboxError::Serialization(e) => cccc_core::CcccError::Serialization(e),
            InboxError::Io(e) => cccc_core::CcccError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, InboxError>;
