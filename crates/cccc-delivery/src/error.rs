use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Ledger(#[from] cccc_ledger::LedgerError),

    #[error(transparent)]
    Inbox(#[from] cccc_inbox::InboxError),

    #[error(transparent)]
    Actor(#[from] cccc_actors::ActorError),

    #[error(transparent)]
    Core(#[from] cccc_core::CcccError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<DeliveryError> for cccc_core::CcccError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::InvalidRequest(m) => cccc_core::CcccError::InvalidRequest(m),
            DeliveryError::Ledger(e) => e.into(),
            DeliveryError::Inbox(e) => e.into(),
            DeliveryError::Actor(e) => e.into(),
            DeliveryError::Core(e) => e,
            DeliveryError::Io(e) => cccc_core::CcccError::Io(e),
            DeliveryError::Serialization(e) => cccc_core::CcccError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
