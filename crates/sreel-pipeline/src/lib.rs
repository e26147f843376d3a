//! Story-to-video pipeline.
//!
//! This crate provides:
//! - Phase runners for settings, prompts, images, motion, videos, upload
//! - Batch submission and retrieval against the text and image gateways
//! - Per-run cost tracking and progress reporting
//! - Buffered error logging and webhook notifications

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod notify;
pub mod phases;
pub mod script;

pub use config::PipelineConfig;
pub use context::RunContext;
pub use error::{PipelineError, PipelineResult};
pub use logging::LogBuffer;
pub use notify::Notifier;
pub use phases::{PhaseName, PhaseOutcome};
