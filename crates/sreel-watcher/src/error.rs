//! Watcher error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
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

    #[error("Chain step error: {0}")]
    Chain(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WatcherError {
    pub fn chain_error(msg: impl Into<String>) -> Self {
        Self::Chain(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
