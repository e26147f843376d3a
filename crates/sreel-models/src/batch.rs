//! Batch job descriptors and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{ModelError, ModelResult};
use crate::project::ProjectName;

/// Opaque batch identifier assigned by the external job source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Create from the provider-assigned string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of batch job, selecting the gateway, the correlation-id prefix,
/// and the chained flow that runs after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Scene-prompt generation on the text gateway.
    PromptBatch,
    /// Image generation on the image gateway.
    ImageBatch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PromptBatch => "prompt_batch",
            JobKind::ImageBatch => "image_batch",
        }
    }

    /// File name of the per-project job descriptor document.
    pub fn descriptor_filename(&self) -> &'static str {
        match self {
            JobKind::PromptBatch => "prompt_batch_info.json",
            JobKind::ImageBatch => "image_batch_info.json",
        }
    }

    /// Correlation-id prefix embedded in every batch request of this kind.
    pub fn correlation_prefix(&self) -> &'static str {
        match self {
            JobKind::PromptBatch => "prompt",
            JobKind::ImageBatch => "image",
        }
    }

    /// Build the correlation id for one artifact index (`image_042`).
    pub fn correlation_id(&self, index: u32) -> String {
        format!("{}_{:03}", self.correlation_prefix(), index)
    }

    /// Recover the artifact index from a correlation id. Results arrive in
    /// arbitrary order; this is the only routing key.
    pub fn parse_correlation_id(&self, custom_id: &str) -> ModelResult<u32> {
        let prefix = format!("{}_", self.correlation_prefix());
        let digits = custom_id
            .strip_prefix(&prefix)
            .ok_or_else(|| ModelError::invalid_correlation_id(custom_id.to_string()))?;
        digits
            .parse::<u32>()
            .map_err(|_| ModelError::invalid_correlation_id(custom_id.to_string()))
    }

    /// Whether retrieval requires a provider output-file reference.
    pub fn requires_output_ref(&self) -> bool {
        matches!(self, JobKind::ImageBatch)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a batch job.
///
/// `created` through `cancelled` follow the provider lifecycle. `error` is a
/// synthetic state recorded when a status check itself fails (never reported
/// by a provider). `retrieved` and the `post_flow_*` states are local
/// bookkeeping applied after the provider reaches `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    #[default]
    Created,
    Submitted,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelled,
    /// Transient status-check failure; the job itself may still be running.
    Error,
    Retrieved,
    PostFlowStarted,
    PostFlowFailed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Created => "created",
            BatchState::Submitted => "submitted",
            BatchState::Validating => "validating",
            BatchState::InProgress => "in_progress",
            BatchState::Finalizing => "finalizing",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Expired => "expired",
            BatchState::Cancelled => "cancelled",
            BatchState::Error => "error",
            BatchState::Retrieved => "retrieved",
            BatchState::PostFlowStarted => "post_flow_started",
            BatchState::PostFlowFailed => "post_flow_failed",
        }
    }

    /// Provider-terminal: no further automatic progress at the job source.
    pub fn is_provider_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::Expired | BatchState::Cancelled
        )
    }

    /// Provider-declared failure. Never retried automatically; distinct from
    /// a local poll timeout.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            BatchState::Failed | BatchState::Expired | BatchState::Cancelled
        )
    }

    /// Nothing left for the watcher to do with this entry except operator
    /// follow-up. `Completed` is deliberately absent: a persisted `completed`
    /// entry means a chain is still owed (crash before the chain finished).
    pub fn is_watch_resolved(&self) -> bool {
        matches!(
            self,
            BatchState::Failed
                | BatchState::Expired
                | BatchState::Cancelled
                | BatchState::Retrieved
                | BatchState::PostFlowFailed
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partial progress counts surfaced by the job source during polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} done, {} failed", self.completed, self.total, self.failed)
    }
}

/// Persisted record of one external batch job.
///
/// Written to `<output_dir>/<kind>_batch_info.json` at submission time and
/// mirrored into the watch registry; mutated by status checks and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Provider-assigned batch id
    pub id: BatchId,

    /// Job kind
    pub kind: JobKind,

    /// Owning project
    pub project: ProjectName,

    /// Lifecycle state
    #[serde(default)]
    pub state: BatchState,

    /// Number of submitted requests
    pub request_count: u32,

    /// Provider file id of the uploaded request payload, when the gateway
    /// uses file-based submission
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_file_id: Option<String>,

    /// Provider file id of the result payload, set once the job completes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_file_id: Option<String>,

    /// Local directory retrieved artifacts land in
    pub output_dir: PathBuf,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,

    /// Last status-check timestamp
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Completion timestamp (set by retrieval)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Consecutive transient status-check failures
    #[serde(default)]
    pub retry_count: u32,

    /// Successfully retrieved items
    #[serde(default)]
    pub success_count: u32,

    /// Items the provider reported as failed
    #[serde(default)]
    pub failed_count: u32,

    /// Last status-check or retrieval error
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
}

impl JobDescriptor {
    /// Create a descriptor for a freshly accepted submission.
    pub fn new(
        id: BatchId,
        kind: JobKind,
        project: ProjectName,
        request_count: u32,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            kind,
            project,
            state: BatchState::Created,
            request_count,
            input_file_id: None,
            output_file_id: None,
            output_dir,
            submitted_at: Utc::now(),
            last_checked_at: None,
            completed_at: None,
            retry_count: 0,
            success_count: 0,
            failed_count: 0,
            last_error: None,
        }
    }

    /// Record acceptance by the job source.
    pub fn submitted(mut self, state: BatchState) -> Self {
        self.state = state;
        self.submitted_at = Utc::now();
        self
    }

    /// Attach the uploaded request-payload file id.
    pub fn with_input_file(mut self, file_id: impl Into<String>) -> Self {
        self.input_file_id = Some(file_id.into());
        self
    }

    /// Apply the result of one status check.
    pub fn checked(&mut self, state: BatchState, output_file_id: Option<String>) {
        self.state = state;
        self.last_checked_at = Some(Utc::now());
        if output_file_id.is_some() {
            self.output_file_id = output_file_id;
        }
        if state != BatchState::Error {
            self.retry_count = 0;
            self.last_error = None;
        }
    }

    /// Record a transient status-check failure. The synthetic `error` state
    /// keeps the entry watched; the job itself may still be running.
    pub fn check_errored(&mut self, error: impl Into<String>) {
        self.state = BatchState::Error;
        self.last_checked_at = Some(Utc::now());
        self.retry_count += 1;
        self.last_error = Some(error.into());
    }

    /// Record retrieval results.
    pub fn retrieved(&mut self, success_count: u32, failed_count: u32) {
        self.state = BatchState::Retrieved;
        self.success_count = success_count;
        self.failed_count = failed_count;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the chained flow as launched (dedup against re-launch).
    pub fn post_flow_started(&mut self) {
        self.state = BatchState::PostFlowStarted;
        self.last_checked_at = Some(Utc::now());
    }

    /// Mark the chained flow as failed; the entry is retained for operators.
    pub fn post_flow_failed(&mut self, error: impl Into<String>) {
        self.state = BatchState::PostFlowFailed;
        self.last_error = Some(error.into());
        self.last_checked_at = Some(Utc::now());
    }

    /// Whether this descriptor still blocks a new submission of the same
    /// (project, kind): anything not provider-terminal and not yet resolved.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            BatchState::Created
                | BatchState::Submitted
                | BatchState::Validating
                | BatchState::InProgress
                | BatchState::Finalizing
                | BatchState::Error
        )
    }
}
