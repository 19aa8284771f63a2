use thiserror::Error;

/// Stable error taxonomy shared across the kernel and surfaced verbatim as
/// the `code` field of IPC error responses (spec §4.7, §7).
#[derive(Debug, Error)]
pub enum CcccError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("actor not found: {0}")]
    ActorNotFound(String),

    #[error("actor not running: {0}")]
    ActorNotRunning(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("missing group_id")]
    MissingGroupId,

    #[error("missing actor_id")]
    MissingActorId,

    #[error("missing project root for actor {0}")]
    MissingProjectRoot(String),

    #[error("unknown operation: {0}")]
    UnknownOp(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CcccError {
    /// Short error code string sent to clients in IPC responses (spec §4.7).
    pub fn code(&self) -> &'static str {
        match self {
            CcccError::InvalidRequest(_) => "invalid_request",
            CcccError::PermissionDenied(_) => "permission_denied",
            CcccError::GroupNotFound(_) => "group_not_found",
            CcccError::ActorNotFound(_) => "actor_not_found",
            CcccError::ActorNotRunning(_) => "actor_not_running",
            CcccError::EventNotFound(_) => "event_not_found",
            CcccError::MissingGroupId => "missing_group_id",
            CcccError::MissingActorId => "missing_actor_id",
            CcccError::MissingProjectRoot(_) => "missing_project_root",
            CcccError::UnknownOp(_) => "unknown_op",
            CcccError::Resource(_) => "resource_error",
            CcccError::Serialization(_) => "serialization_error",
            CcccError::Io(_) => "io_error",
            CcccError::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CcccError>;
