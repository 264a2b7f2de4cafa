use thiserror::Error;

pub type SaasResult<T> = Result<T, SaasError>;

#[derive(Error, Debug)]
pub enum SaasError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Password does not meet requirements")]
    WeakPassword(Vec<String>),

    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SaasError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SaasError::Validation(msg.into())
    }
}
