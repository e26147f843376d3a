//! Watcher configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Watcher tuning, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Workspace root shared with the pipeline
    pub work_dir: PathBuf,
    /// Sleep between watch cycles
    pub cycle_interval: Duration,
    /// Sleep after a cycle that errored out
    pub error_cooldown: Duration,
    /// Wall-clock ceiling for one chained subprocess step
    pub chain_step_timeout: Duration,
    /// Consecutive transient check failures before a louder warning
    pub persistent_error_threshold: u32,
    /// Pipeline binary the chained steps run
    pub pipeline_bin: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            cycle_interval: Duration::from_secs(300),
            error_cooldown: Duration::from_secs(60),
            chain_step_timeout: Duration::from_secs(86_400),
            persistent_error_threshold: 5,
            pipeline_bin: PathBuf::from("sreel-pipeline"),
        }
    }
}

impl WatcherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("PIPELINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./work")),
            cycle_interval: Duration::from_secs(
                std::env::var("BATCH_CHECK_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            error_cooldown: Duration::from_secs(
                std::env::var("ERROR_COOLDOWN")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            chain_step_timeout: Duration::from_secs(
                std::env::var("CHAIN_STEP_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            ),
            persistent_error_threshold: std::env::var("PERSISTENT_ERROR_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            pipeline_bin: std::env::var("PIPELINE_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sreel-pipeline")),
        }
    }
}
