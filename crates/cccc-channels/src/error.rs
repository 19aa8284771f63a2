use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel '{0}' not registered")]
    NotFound(String),

    #[error("channel '{0}' not connected")]
    NotConnected(String),

    #[error("channel adapter error: {0}")]
    Adapter(String),

    #[error(transparent)]
    Core(#[from] cccc_core::CcccError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::NotFound(_) => "not_found",
            ChannelError::NotConnected(_) => "state",
            ChannelError::Adapter(_) => "adapter",
            ChannelError::Core(e) => e.code(),
            ChannelError::Io(_) => "io",
            ChannelError::Serialization(_) => "serialization",
        }
    }
}

impl From<ChannelError> for cccc_core::CcccError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Core(e) => e,
            ChannelError::Io(e) => cccc_core::CcccError::Io(e),
            ChannelError::Serialization(e) => cccc_core::CcccError::Serialization(e),
            other => cccc_core::CcccError::InvalidRequest(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
