//! Batch watch service.
//!
//! A standalone process that keeps in-flight batch jobs moving after the
//! submitting pipeline run has exited: each cycle polls provider state for
//! every watched job, persists the transition, and runs the chained
//! retrieval flow as pipeline subprocesses once a batch completes.

pub mod chain;
pub mod config;
pub mod error;
pub mod watcher;

pub use chain::{chain_for, ChainOutcome, ChainRunner, ChainStep};
pub use config::WatcherConfig;
pub use error::{WatcherError, WatcherResult};
pub use watcher::{CycleReport, EntryAction, Watcher};
