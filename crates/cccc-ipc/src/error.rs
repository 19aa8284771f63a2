use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown op '{0}'")]
    UnknownOp(String),
    #[error(transparent)]
    Core(#[from] cccc_core::CcccError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl IpcError {
    /// The stable error code surfaced on the wire (spec §4.7).
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::InvalidRequest(_) => "invalid_request",
            IpcError::UnknownOp(_) => "unknown_op",
            IpcError::Core(e) => e.code(),
            IpcError::Io(_) => "io",
            IpcError::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
