use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor not found: {0}")]
    NotFound(String),

    #[error("actor not running: {0}")]
    NotRunning(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("missing project root for actor {0}")]
    MissingProjectRoot(String),

    #[error("failed to spawn actor: {0}")]
    Spawn(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<cccc_ledger::LedgerError> for ActorError {
    fn from(e: cccc_ledger::LedgerError) -> Self {
        match e {
            cccc_ledger::LedgerError::Invariant(m) => ActorError::Invariant(m),
            cccc_ledger::LedgerError::NotFound(m) => ActorError::Invariant(m),
            cccc_ledger::LedgerError::Resource(m) => ActorError::Spawn(m),
            cccc_ledger::LedgerError::Serialization(e) => ActorError::Serialization(e),
            cccc_ledger::LedgerError::Io(e) => ActorError::Io(e),
        }
    }
}

impl From<ActorError> for cccc_core::CcccError {
    fn from(e: ActorError) -> Self {
        match e {
            ActorError::NotFound(id) => cccc_core::CcccError::ActorNotFound(id),
            ActorError::NotRunning(id) => cccc_core::CcccError::ActorNotRunning(id),
            ActorError::PermissionDenied(m) => cccc_core::CcccError::PermissionDenied(m),
            ActorError::Invariant(m) => cccc_core::CcccError::InvalidRequest(m),
            ActorError::MissingProjectRoot(id) => cccc_core::CcccError::MissingProjectRoot(id),
            ActorError::Spawn(m) => cccc_core::CcccError::Resource(m),
            ActorError::Serialization(e) => cccc_core::CcccError::Serialization(e),
            ActorError::Io(e) => cccc_core::CcccError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ActorError>;
