use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl From<UserError> for cccc_core::CcccError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::PermissionDenied(m) => cccc_core::CcccError::PermissionDenied(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, UserError>;
