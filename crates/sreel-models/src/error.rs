//! Model-level errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid project name: {0}")]
    InvalidProjectName(String),

    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_project_name(msg: impl Into<String>) -> Self {
        Self::InvalidProjectName(msg.into())
    }

    pub fn invalid_correlation_id(msg: impl Into<String>) -> Self {
        Self::InvalidCorrelationId(msg.into())
    }
}
