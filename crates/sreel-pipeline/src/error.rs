//! Pipeline error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model error: {0}")]
    Model(#[from] sreel_models::ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] sreel_storage::StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] sreel_providers::ProviderError),

    #[error("Batch error: {0}")]
    Batch(#[from] sreel_batch::BatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),
}

impl PipelineError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn script_error(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }

    pub fn missing_artifact(msg: impl Into<String>) -> Self {
        Self::MissingArtifact(msg.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
