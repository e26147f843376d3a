//! Shared per-run state.
//!
//! One [`RunContext`] is built at startup and threaded through every phase.
//! It owns the workspace paths, the optional archive handle, the cost
//! tracker, and the progress counters the interrupt handler reports from.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use sreel_models::{CostTracker, ProjectName};
use sreel_storage::{
    ArchiveClient, ArchiveSync, CheckpointStore, ObjectStore, ProjectLayout, WorkspacePaths,
};

use crate::config::PipelineConfig;
use crate::logging::LogBuffer;
use crate::notify::Notifier;

/// Where the current phase stands, for interrupt reporting.
#[derive(Debug, Clone, Default)]
pub struct PhaseProgress {
    pub phase: String,
    pub done: u32,
    pub total: u32,
}

/// State shared by all phases of a run.
pub struct RunContext {
    config: PipelineConfig,
    paths: WorkspacePaths,
    store: Option<Arc<dyn ObjectStore>>,
    notifier: Notifier,
    log_buffer: LogBuffer,
    cost: Mutex<CostTracker>,
    progress: Mutex<PhaseProgress>,
    active_project: Mutex<Option<String>>,
}

impl RunContext {
    pub fn new(
        config: PipelineConfig,
        paths: WorkspacePaths,
        store: Option<Arc<dyn ObjectStore>>,
        notifier: Notifier,
        log_buffer: LogBuffer,
    ) -> Self {
        Self {
            config,
            paths,
            store,
            notifier,
            log_buffer,
            cost: Mutex::new(CostTracker::new()),
            progress: Mutex::new(PhaseProgress::default()),
            active_project: Mutex::new(None),
        }
    }

    /// Build from environment. A missing archive configuration disables the
    /// remote tier; everything then runs against the local workspace only.
    pub fn from_env(config: PipelineConfig, log_buffer: LogBuffer) -> Self {
        let store: Option<Arc<dyn ObjectStore>> = match ArchiveClient::from_env() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Archive disabled: {}", e);
                None
            }
        };
        let paths = WorkspacePaths::new(config.work_dir.clone());
        Self::new(config, paths, store, Notifier::from_env(), log_buffer)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn store(&self) -> Option<Arc<dyn ObjectStore>> {
        self.store.clone()
    }

    pub fn sync(&self) -> Option<ArchiveSync> {
        self.store.clone().map(ArchiveSync::new)
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.store.clone())
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn log_buffer(&self) -> &LogBuffer {
        &self.log_buffer
    }

    pub fn layout(&self, project: &ProjectName) -> ProjectLayout {
        self.paths.project(project)
    }

    /// Mutate the cost tracker under the lock.
    pub fn record_cost(&self, f: impl FnOnce(&mut CostTracker)) {
        let mut cost = self.cost.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut cost);
    }

    pub fn cost_snapshot(&self) -> CostTracker {
        self.cost.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_phase(&self, phase: &str, total: u32) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.phase = phase.to_string();
        progress.done = 0;
        progress.total = total;
    }

    pub fn item_done(&self) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.done += 1;
    }

    pub fn progress_snapshot(&self) -> PhaseProgress {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_active_project(&self, project: &ProjectName) {
        let mut active = self
            .active_project
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *active = Some(project.as_str().to_string());
    }

    pub fn active_project(&self) -> Option<String> {
        self.active_project
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spawn the Ctrl-C handler. On interrupt it reports progress and cost,
    /// notifies, flushes the error-log buffer, and exits 130. In-flight
    /// provider jobs are left running; checkpoints already on disk make the
    /// next run resume where this one stopped.
    pub fn install_interrupt_handler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let progress = ctx.progress_snapshot();
            info!(
                "Interrupted during {} at {}/{} items",
                progress.phase, progress.done, progress.total
            );
            info!("\n{}", ctx.cost_snapshot().summary_block());
            if let Some(project) = ctx.active_project() {
                ctx.notifier()
                    .send_interrupted(&project, &progress.phase, progress.done, progress.total)
                    .await;
            }
            ctx.flush_error_log();
            std::process::exit(130);
        })
    }

    /// Flush the buffered log to `logs/error_<timestamp>.log`, if anything
    /// was captured.
    pub fn flush_error_log(&self) {
        match self.log_buffer.flush_to(&self.paths.logs_dir()) {
            Ok(Some(path)) => info!("Buffered log flushed to {}", path.display()),
            Ok(None) => {}
            Err(e) => error!("Could not flush buffered log: {}", e),
        }
    }
}
