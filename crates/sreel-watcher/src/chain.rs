//! Chained flows run after a batch completes.
//!
//! Steps run as `sreel-pipeline phase <name> --project <p>` subprocesses so
//! the watcher never links against the phase runners. Exit 0 is success; a
//! fatal step failure aborts the chain, a non-fatal one is logged and the
//! chain continues.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use sreel_models::JobKind;

use crate::error::{WatcherError, WatcherResult};

/// One subprocess step of a chained flow.
#[derive(Debug, Clone, Copy)]
pub struct ChainStep {
    /// Phase name as understood by the pipeline binary.
    pub phase: &'static str,
    /// Whether failure aborts the rest of the chain.
    pub fatal: bool,
}

const IMAGE_CHAIN: &[ChainStep] = &[
    ChainStep {
        phase: "retrieve-images",
        fatal: true,
    },
    ChainStep {
        phase: "videos",
        fatal: false,
    },
    ChainStep {
        phase: "upload",
        fatal: true,
    },
];

/// Prompt completion feeds the image batch; motion runs best-effort since
/// the videos phase surfaces a missing directive file on its own.
const PROMPT_CHAIN: &[ChainStep] = &[
    ChainStep {
        phase: "retrieve-prompts",
        fatal: true,
    },
    ChainStep {
        phase: "submit-images",
        fatal: true,
    },
    ChainStep {
        phase: "motion",
        fatal: false,
    },
];

/// Steps owed after a batch of the given kind completes.
pub fn chain_for(kind: JobKind) -> &'static [ChainStep] {
    match kind {
        JobKind::PromptBatch => PROMPT_CHAIN,
        JobKind::ImageBatch => IMAGE_CHAIN,
    }
}

/// How a chain ended. The failed step's name lands in the descriptor's
/// last error for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Success,
    Failed { step: &'static str, reason: String },
}

/// Runs chain steps as bounded pipeline subprocesses.
pub struct ChainRunner {
    pipeline_bin: PathBuf,
    step_timeout: Duration,
}

impl ChainRunner {
    pub fn new(pipeline_bin: PathBuf, step_timeout: Duration) -> Self {
        Self {
            pipeline_bin,
            step_timeout,
        }
    }

    /// Run the whole chain for one completed batch.
    pub async fn run(&self, kind: JobKind, project: &str) -> ChainOutcome {
        for step in chain_for(kind) {
            info!("Running chain step {} for {}", step.phase, project);
            match self.run_step(step.phase, project).await {
                Ok(()) => info!("Chain step {} for {} done", step.phase, project),
                Err(e) if step.fatal => {
                    return ChainOutcome::Failed {
                        step: step.phase,
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    warn!(
                        "Non-fatal chain step {} for {} failed: {}",
                        step.phase, project, e
                    );
                }
            }
        }
        ChainOutcome::Success
    }

    /// Run one `sreel-pipeline phase …` subprocess. The child inherits
    /// stdout/stderr so its logs interleave with the watcher's.
    async fn run_step(&self, phase: &str, project: &str) -> WatcherResult<()> {
        let mut child = Command::new(&self.pipeline_bin)
            .arg("phase")
            .arg(phase)
            .arg("--project")
            .arg(project)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WatcherError::chain_error(format!(
                    "could not start {}: {}",
                    self.pipeline_bin.display(),
                    e
                ))
            })?;

        let status = tokio::time::timeout(self.step_timeout, child.wait())
            .await
            .map_err(|_| {
                WatcherError::chain_error(format!(
                    "timed out after {}s",
                    self.step_timeout.as_secs()
                ))
            })??;

        if status.success() {
            Ok(())
        } else {
            Err(WatcherError::chain_error(format!("exited with {}", status)))
        }
    }
}
