use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error(transparent)]
    Ledger(#[from] cccc_ledger::LedgerError),

    #[error(transparent)]
    Delivery(#[from] cccc_delivery::DeliveryError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<AutomationError> for cccc_core::CcccError {
    fn from(e: AutomationError) -> Self {
        match e {
            AutomationError::Ledger(e) => e.into(),
            AutomationError::Delivery(e) => e.into(),
            AutomationError::Serialization(e) => cccc_core::CcccError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
