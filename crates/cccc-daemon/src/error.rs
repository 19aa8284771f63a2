use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("group already exists: {0}")]
    GroupExists(String),

    #[error(transparent)]
    Core(#[from] cccc_core::CcccError),

    #[error(transparent)]
    Delivery(#[from] cccc_delivery::DeliveryError),

    #[error(transparent)]
    Channel(#[from] cccc_channels::ChannelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl From<cccc_ledger::LedgerError> for DaemonError {
    fn from(e: cccc_ledger::LedgerError) -> Self {
        DaemonError::Core(e.into())
    }
}

impl From<cccc_inbox::InboxError> for DaemonError {
    fn from(e: cccc_inbox::InboxError) -> Self {
        DaemonError::Core(e.into())
    }
}

impl From<cccc_actors::ActorError> for DaemonError {
    fn from(e: cccc_actors::ActorError) -> Self {
        DaemonError::Core(e.into())
    }
}

impl From<cccc_automation::AutomationError> for DaemonError {
    fn from(e: cccc_automation::AutomationError) -> Self {
        DaemonError::Core(cccc_core::CcccError::Internal(e.to_string()))
    }
}

impl DaemonError {
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::GroupNotFound(_) => "group_not_found",
            DaemonError::GroupExists(_) => "invalid_request",
            DaemonError::Core(e) => e.code(),
            DaemonError::Delivery(_) => "invalid_request",
            DaemonError::Channel(e) => e.code(),
            DaemonError::Io(_) => "io",
            DaemonError::Serialization(_) => "serialization",
            DaemonError::Yaml(_) => "serialization",
        }
    }
}

impl From<DaemonError> for cccc_ipc::IpcError {
    fn from(e: DaemonError) -> Self {
        match e {
            DaemonError::Core(e) => cccc_ipc::IpcError::Core(e),
            DaemonError::Io(e) => cccc_ipc::IpcError::Io(e),
            DaemonError::Serialization(e) => cccc_ipc::IpcError::Serialization(e),
            other => cccc_ipc::IpcError::Core(cccc_core::CcccError::Internal(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
