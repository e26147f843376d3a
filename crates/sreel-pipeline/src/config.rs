//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline runner configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Local workspace root (input scripts, per-project output, registry)
    pub work_dir: PathBuf,
    /// Submit prompt/image work as provider batches instead of running
    /// the synchronous per-item paths
    pub batch_enabled: bool,
    /// Truncate pending work per phase, for cheap dry runs
    pub test_item_limit: Option<usize>,
    /// Batch status poll interval
    pub batch_check_interval: Duration,
    /// Blocking batch poll ceiling
    pub batch_max_wait: Duration,
    /// Video task poll interval
    pub video_poll_interval: Duration,
    /// Per-item video poll ceiling
    pub video_max_wait: Duration,
    /// Wall-clock ceiling for a single phase
    pub phase_timeout: Duration,
    /// Extra closing scenes appended after the last script line
    pub finale_scenes: u32,
    /// Remote mirror cadence during the prompt phase (every N scenes)
    pub mirror_stride: usize,
    /// Delay between consecutive synchronous generation calls
    pub pacing_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            batch_enabled: false,
            test_item_limit: None,
            batch_check_interval: Duration::from_secs(300),
            batch_max_wait: Duration::from_secs(86_400),
            video_poll_interval: Duration::from_secs(15),
            video_max_wait: Duration::from_secs(300),
            phase_timeout: Duration::from_secs(86_400),
            finale_scenes: 2,
            mirror_stride: 10,
            pacing_delay: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("PIPELINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./work")),
            batch_enabled: std::env::var("PIPELINE_BATCH_ENABLED")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
            test_item_limit: std::env::var("PIPELINE_TEST_ITEM_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok()),
            batch_check_interval: Duration::from_secs(
                std::env::var("BATCH_CHECK_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            batch_max_wait: Duration::from_secs(
                std::env::var("BATCH_MAX_WAIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            ),
            video_poll_interval: Duration::from_secs(
                std::env::var("VIDEO_POLL_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            video_max_wait: Duration::from_secs(
                std::env::var("VIDEO_MAX_WAIT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            phase_timeout: Duration::from_secs(
                std::env::var("PHASE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            ),
            finale_scenes: std::env::var("FINALE_SCENE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            mirror_stride: std::env::var("MIRROR_STRIDE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            pacing_delay: Duration::from_secs(
                std::env::var("PACING_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.work_dir, PathBuf::from("./work"));
        assert!(!config.batch_enabled);
        assert_eq!(config.test_item_limit, None);
        assert_eq!(config.batch_check_interval, Duration::from_secs(300));
        assert_eq!(config.video_poll_interval, Duration::from_secs(15));
        assert_eq!(config.finale_scenes, 2);
        assert_eq!(config.mirror_stride, 10);
    }
}
