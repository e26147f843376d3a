//! Batch job lifecycle: submission, polling, retrieval, and the watch
//! registry that survives process restarts.
//!
//! The flow for one project is submit → poll → retrieve → chained flow.
//! [`Submitter`] filters already-done work through the checkpoint store
//! before anything is sent out, [`Poller`] tracks provider state and keeps
//! the persisted descriptor current, and [`Retriever`] lands results as
//! local artifacts. [`WatchRegistry`] records every in-flight job so a
//! separate watcher process can pick up where a crashed run left off.
//!
//! Gateways are abstracted behind [`JobSource`]; one adapter per
//! [`JobKind`](sreel_models::JobKind) lives in [`adapters`].

pub mod adapters;
pub mod error;
pub mod persist;
pub mod poll;
pub mod registry;
pub mod retrieve;
pub mod source;
pub mod submit;

pub use adapters::{ImageBatchSource, TextBatchSource};
pub use error::{BatchError, BatchResult};
pub use persist::{load_descriptor, save_descriptor, write_atomic, write_json_atomic};
pub use poll::{PollOutcome, Poller, PollerConfig};
pub use registry::{RegistryDoc, WatchRegistry};
pub use retrieve::{RetrieveReport, Retriever};
pub use source::{
    BatchRequest, BatchSnapshot, ItemOutcome, JobSource, RequestPayload, ResultRecord,
    SourceRegistry, SubmittedBatch,
};
pub use submit::{SubmitOutcome, Submitter};
