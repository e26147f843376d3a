//! The job-source seam: one trait per gateway capability set, selected by
//! [`JobKind`] at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use sreel_models::{BatchId, BatchProgress, BatchState, JobDescriptor, JobKind};
use sreel_providers::types::{CompletionParams, ImageRequestBody};

use crate::error::{BatchError, BatchResult};

/// Kind-specific request payload for one batch item.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    /// Text-gateway completion parameters.
    Completion(CompletionParams),
    /// Image-gateway render parameters.
    Image(ImageRequestBody),
}

/// One item of a batch submission, already carrying its correlation id.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub custom_id: String,
    pub payload: RequestPayload,
}

/// What the source reports back at submission time.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub id: BatchId,
    pub state: BatchState,
    /// File id of the uploaded request payload, for file-based gateways.
    pub input_file_id: Option<String>,
}

/// One status observation.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub state: BatchState,
    pub progress: Option<BatchProgress>,
    pub output_file_id: Option<String>,
}

/// Result of one batch item.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// Raw text output (prompt batches).
    Text(String),
    /// Decoded binary artifact (image batches).
    Binary(Vec<u8>),
    /// Item-level failure message.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub custom_id: String,
    pub outcome: ItemOutcome,
}

/// A gateway capable of running batches of one [`JobKind`].
///
/// Implementations translate gateway-specific statuses into the shared
/// [`BatchState`] machine; synthetic states (`error`, `retrieved`,
/// `post_flow_*`) are never returned from here.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Submit one batch; all checkpoint filtering has already happened.
    async fn submit(&self, requests: Vec<BatchRequest>) -> BatchResult<SubmittedBatch>;

    /// Observe current state.
    async fn status(&self, id: &BatchId) -> BatchResult<BatchSnapshot>;

    /// Fetch per-item results of a completed batch.
    async fn results(&self, descriptor: &JobDescriptor) -> BatchResult<Vec<ResultRecord>>;
}

/// Runtime lookup of the source handling each job kind.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<JobKind, Arc<dyn JobSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own declared kind.
    pub fn register(&mut self, source: Arc<dyn JobSource>) {
        self.sources.insert(source.kind(), source);
    }

    pub fn get(&self, kind: JobKind) -> BatchResult<Arc<dyn JobSource>> {
        self.sources
            .get(&kind)
            .cloned()
            .ok_or_else(|| BatchError::unknown_kind(kind.as_str()))
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.sources.keys().copied().collect()
    }
}
