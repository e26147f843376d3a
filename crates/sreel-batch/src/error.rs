//! Error types for batch lifecycle operations.

use thiserror::Error;

use sreel_models::ModelError;
use sreel_providers::ProviderError;
use sreel_storage::StorageError;

/// Errors from submission, polling, retrieval, and the watch registry.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The registry file changed under us between load and save.
    #[error("Registry version conflict: loaded {loaded}, on disk {found}")]
    RegistryConflict { loaded: u64, found: u64 },

    #[error("No job source registered for kind {0}")]
    UnknownKind(String),

    #[error("Job {0} completed without an output file reference")]
    MissingOutputRef(String),

    #[error("Job {id} is not ready for retrieval (state {state})")]
    NotReady { id: String, state: String },

    #[error("Request payload does not fit job kind {0}")]
    PayloadMismatch(String),

    #[error("Nothing to submit: {0}")]
    NothingToSubmit(String),
}

pub type BatchResult<T> = Result<T, BatchError>;

impl BatchError {
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind(kind.into())
    }

    pub fn missing_output_ref(id: impl Into<String>) -> Self {
        Self::MissingOutputRef(id.into())
    }

    pub fn not_ready(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::NotReady {
            id: id.into(),
            state: state.into(),
        }
    }

    pub fn payload_mismatch(kind: impl Into<String>) -> Self {
        Self::PayloadMismatch(kind.into())
    }

    pub fn nothing_to_submit(msg: impl Into<String>) -> Self {
        Self::NothingToSubmit(msg.into())
    }

    /// Whether a failed status check should keep the job watched instead of
    /// failing the caller. Anything short of an account or configuration
    /// problem is assumed to pass eventually.
    pub fn is_transient_check_failure(&self) -> bool {
        match self {
            Self::Provider(e) => !e.is_fatal(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}
