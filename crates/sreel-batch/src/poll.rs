//! Job status polling against the source, with descriptor persistence on
//! every transition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use sreel_models::{BatchState, JobDescriptor};
use sreel_storage::ProjectLayout;

use crate::error::BatchResult;
use crate::persist;
use crate::source::JobSource;

/// Polling cadence and ceilings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep between status checks.
    pub interval: Duration,
    /// Local wall-clock ceiling for [`Poller::wait_for_completion`].
    pub max_wait: Duration,
    /// Consecutive transient check failures before a louder warning.
    pub persistent_error_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_wait: Duration::from_secs(86_400),
            persistent_error_threshold: 5,
        }
    }
}

/// How a bounded wait ended.
///
/// `TimedOut` is the local ceiling: the provider may still finish the job
/// later, so the entry stays watchable. Provider-declared failures,
/// including the provider's own `expired`, arrive as `ProviderFailed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    ProviderFailed(BatchState),
    TimedOut,
}

/// Polls one source and keeps the persisted descriptor current.
pub struct Poller {
    source: Arc<dyn JobSource>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(source: Arc<dyn JobSource>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    /// Run one status check and persist the resulting transition.
    ///
    /// A transient check failure marks the descriptor `error` and returns
    /// normally; the job is likely still running and the next check will
    /// tell. Fatal errors (account, configuration) propagate.
    pub async fn check_once(
        &self,
        layout: &ProjectLayout,
        descriptor: &mut JobDescriptor,
    ) -> BatchResult<BatchState> {
        let previous = descriptor.state;

        match self.source.status(&descriptor.id).await {
            Ok(snapshot) => {
                descriptor.checked(snapshot.state, snapshot.output_file_id);
                if let Some(progress) = snapshot.progress {
                    descriptor.success_count = progress.completed;
                    descriptor.failed_count = progress.failed;
                    debug!("Batch {}: {}", descriptor.id, progress);
                }
                if descriptor.state != previous {
                    info!(
                        "Batch {} moved {} -> {}",
                        descriptor.id, previous, descriptor.state
                    );
                }
                persist::save_descriptor(layout, descriptor)?;
                Ok(descriptor.state)
            }
            Err(e) if e.is_transient_check_failure() => {
                descriptor.check_errored(e.to_string());
                if descriptor.retry_count >= self.config.persistent_error_threshold {
                    warn!(
                        "Batch {} has failed {} consecutive status checks: {}",
                        descriptor.id, descriptor.retry_count, e
                    );
                } else {
                    warn!("Status check for batch {} failed: {}", descriptor.id, e);
                }
                persist::save_descriptor(layout, descriptor)?;
                Ok(BatchState::Error)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the provider reaches a terminal state or the local
    /// ceiling passes. The first check happens immediately.
    pub async fn wait_for_completion(
        &self,
        layout: &ProjectLayout,
        descriptor: &mut JobDescriptor,
    ) -> BatchResult<PollOutcome> {
        let started = Instant::now();

        loop {
            let state = self.check_once(layout, descriptor).await?;
            if state == BatchState::Completed {
                return Ok(PollOutcome::Completed);
            }
            if state.is_provider_failure() {
                warn!("Batch {} ended {}", descriptor.id, state);
                return Ok(PollOutcome::ProviderFailed(state));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.max_wait {
                warn!(
                    "Batch {} still {} after {:?}, giving up the foreground wait",
                    descriptor.id, state, elapsed
                );
                return Ok(PollOutcome::TimedOut);
            }
            let remaining = self.config.max_wait - elapsed;
            tokio::time::sleep(self.config.interval.min(remaining)).await;
        }
    }
}
