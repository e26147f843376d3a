//! The watch loop.
//!
//! Each cycle performs one status check per non-terminal registry entry,
//! persists every transition immediately, and runs the chained flow for
//! entries that completed. Chain success removes the entry (or leaves the
//! follow-up batch a chained step registered); chain failure retains the
//! entry as `post_flow_failed` for operator follow-up.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use sreel_batch::{
    BatchError, ImageBatchSource, Poller, PollerConfig, SourceRegistry, TextBatchSource,
    WatchRegistry,
};
use sreel_models::{BatchId, BatchState, JobDescriptor, JobKind, ProjectName};
use sreel_providers::{ImageGatewayClient, TextGatewayClient};
use sreel_storage::{ArchiveClient, ObjectStore, WorkspacePaths};

use crate::chain::{ChainOutcome, ChainRunner};
use crate::config::WatcherConfig;
use crate::error::WatcherResult;

/// What one cycle did with one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// Status checked; the job is still running at the provider.
    StillRunning,
    /// Provider declared the job failed, expired, or cancelled. Retained
    /// for operator follow-up, never auto-retried.
    ProviderFailed,
    /// Chain ran to success; the entry was removed or handed over to the
    /// follow-up batch a chained step registered.
    Resolved,
    /// Chain failed; the entry was retained as `post_flow_failed`.
    ChainFailed,
    /// A previously launched chain has not reported back yet.
    ChainInFlight,
    /// Terminal entry waiting for operator action.
    AwaitingOperator,
}

/// Summary of one watch cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub watched: usize,
    pub checked: u32,
    pub resolved: u32,
    pub chains_failed: u32,
    pub entry_errors: u32,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} watched, {} checked, {} resolved, {} chain failures, {} entry errors",
            self.watched, self.checked, self.resolved, self.chains_failed, self.entry_errors
        )
    }
}

/// Long-lived owner of the watch registry.
pub struct Watcher {
    config: WatcherConfig,
    paths: WorkspacePaths,
    store: Option<Arc<dyn ObjectStore>>,
    sources: SourceRegistry,
    chain: ChainRunner,
}

impl Watcher {
    pub fn new(
        config: WatcherConfig,
        store: Option<Arc<dyn ObjectStore>>,
        sources: SourceRegistry,
    ) -> Self {
        let paths = WorkspacePaths::new(config.work_dir.clone());
        let chain = ChainRunner::new(config.pipeline_bin.clone(), config.chain_step_timeout);
        Self {
            config,
            paths,
            store,
            sources,
            chain,
        }
    }

    /// Build from environment: gateway-backed sources, and the archive
    /// mirror when configured. A missing archive only disables the mirror.
    pub fn from_env(config: WatcherConfig) -> WatcherResult<Self> {
        let store: Option<Arc<dyn ObjectStore>> = match ArchiveClient::from_env() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Archive disabled: {}", e);
                None
            }
        };

        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(TextBatchSource::new(Arc::new(
            TextGatewayClient::from_env()?,
        ))));
        sources.register(Arc::new(ImageBatchSource::new(Arc::new(
            ImageGatewayClient::from_env()?,
        ))));

        Ok(Self::new(config, store, sources))
    }

    /// Run cycles until interrupted. The in-flight cycle always finishes
    /// so every transition it made is persisted before exit.
    pub async fn run_loop(&self) -> WatcherResult<()> {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });

        info!(
            "Watcher started, checking every {}s",
            self.config.cycle_interval.as_secs()
        );
        loop {
            let sleep_for = match self.run_cycle().await {
                Ok(report) => {
                    info!("Cycle done: {}", report);
                    self.config.cycle_interval
                }
                Err(e) => {
                    warn!("Watch cycle failed: {}, cooling down", e);
                    self.config.error_cooldown
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = rx.changed() => {
                    info!("Interrupt received, stopping");
                    break;
                }
            }
        }
        info!("Watcher stopped");
        Ok(())
    }

    /// One pass over the registry. Per-entry trouble is isolated so the
    /// remaining entries still advance.
    pub async fn run_cycle(&self) -> WatcherResult<CycleReport> {
        let mut registry = WatchRegistry::open(&self.paths, self.store.clone()).await?;
        let mut report = CycleReport {
            watched: registry.len(),
            ..Default::default()
        };
        if registry.is_empty() {
            debug!("Nothing watched");
            return Ok(report);
        }
        info!("Checking {} watched project(s)", registry.len());

        let projects: Vec<String> = registry.projects().keys().cloned().collect();
        for project in projects {
            let descriptor = match registry.get(&project) {
                Some(descriptor) => descriptor.clone(),
                None => continue,
            };
            match self.advance_entry(&mut registry, descriptor).await {
                Ok(EntryAction::StillRunning) | Ok(EntryAction::ProviderFailed) => {
                    report.checked += 1;
                }
                Ok(EntryAction::Resolved) => report.resolved += 1,
                Ok(EntryAction::ChainFailed) => report.chains_failed += 1,
                Ok(EntryAction::ChainInFlight) | Ok(EntryAction::AwaitingOperator) => {}
                Err(e) => {
                    warn!("Entry {} errored: {}", project, e);
                    report.entry_errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn advance_entry(
        &self,
        registry: &mut WatchRegistry,
        mut descriptor: JobDescriptor,
    ) -> WatcherResult<EntryAction> {
        let project = descriptor.project.as_str().to_string();

        if descriptor.state == BatchState::PostFlowStarted {
            info!("Chain for {} was already launched, not starting another", project);
            return Ok(EntryAction::ChainInFlight);
        }
        if descriptor.state.is_watch_resolved() {
            debug!(
                "Entry {} is {} and waits for operator action",
                project, descriptor.state
            );
            return Ok(EntryAction::AwaitingOperator);
        }

        if descriptor.state != BatchState::Completed {
            let source = self.sources.get(descriptor.kind)?;
            let poller = Poller::new(
                source,
                PollerConfig {
                    interval: self.config.cycle_interval,
                    persistent_error_threshold: self.config.persistent_error_threshold,
                    ..Default::default()
                },
            );
            let layout = self.paths.project(&descriptor.project);
            let state = poller.check_once(&layout, &mut descriptor).await?;
            self.persist(registry, &descriptor).await?;

            if state != BatchState::Completed {
                if state.is_provider_failure() {
                    warn!(
                        "Batch {} for {} ended {}, operator action needed",
                        descriptor.id, project, state
                    );
                    return Ok(EntryAction::ProviderFailed);
                }
                return Ok(EntryAction::StillRunning);
            }
        }

        // Mark the chain launched before running it so a concurrent tick
        // cannot start a second one.
        descriptor.post_flow_started();
        self.persist(registry, &descriptor).await?;

        let outcome = self.chain.run(descriptor.kind, &project).await;
        self.resolve_after_chain(registry, &descriptor, outcome).await
    }

    /// Apply the chain result. The registry is re-read first: a chained
    /// `submit-images` step registers the follow-up image batch from its
    /// own process, and that entry must survive.
    async fn resolve_after_chain(
        &self,
        registry: &mut WatchRegistry,
        descriptor: &JobDescriptor,
        outcome: ChainOutcome,
    ) -> WatcherResult<EntryAction> {
        let project = descriptor.project.as_str();
        registry.reload();

        let replaced = match registry.get(project) {
            Some(current) => current.id != descriptor.id || current.kind != descriptor.kind,
            None => false,
        };

        match outcome {
            ChainOutcome::Success => {
                if replaced {
                    info!("Project {} moved on to its follow-up batch", project);
                } else if registry.remove(project).is_some() {
                    registry.save().await?;
                    info!("Project {} fully resolved", project);
                }
                Ok(EntryAction::Resolved)
            }
            ChainOutcome::Failed { step, reason } => {
                warn!("Chain for {} failed at {}: {}", project, step, reason);
                if replaced {
                    // The follow-up batch stays watched and carries the
                    // flow from here.
                    return Ok(EntryAction::ChainFailed);
                }
                let mut failed = descriptor.clone();
                failed.post_flow_failed(format!("{}: {}", step, reason));
                self.persist(registry, &failed).await?;
                Ok(EntryAction::ChainFailed)
            }
        }
    }

    /// Upsert + save, retrying once through a reload when another process
    /// (a chained subprocess) wrote the registry since we loaded it.
    async fn persist(
        &self,
        registry: &mut WatchRegistry,
        descriptor: &JobDescriptor,
    ) -> WatcherResult<()> {
        registry.upsert(descriptor.clone());
        match registry.save().await {
            Ok(()) => Ok(()),
            Err(BatchError::RegistryConflict { .. }) => {
                registry.reload();
                registry.upsert(descriptor.clone());
                registry.save().await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Human-readable registry dump for the status command.
    pub async fn status(&self) -> WatcherResult<String> {
        let registry = WatchRegistry::open(&self.paths, self.store.clone()).await?;
        if registry.is_empty() {
            return Ok("No watched jobs.".to_string());
        }

        let mut out = format!("{} watched job(s):\n", registry.len());
        for (project, job) in registry.projects() {
            out.push_str(&format!(
                "  {:<20} {:<12} {:<16} {} ({} ok / {} failed of {})",
                project,
                job.kind.as_str(),
                job.state.as_str(),
                job.id,
                job.success_count,
                job.failed_count,
                job.request_count,
            ));
            if let Some(checked) = &job.last_checked_at {
                out.push_str(&format!("  checked {}", checked.format("%Y-%m-%d %H:%M:%S")));
            }
            if let Some(error) = &job.last_error {
                out.push_str(&format!("\n      last error: {}", error));
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Manually register a job (registry repair).
    pub async fn add(
        &self,
        project: &str,
        kind: JobKind,
        batch_id: &str,
        request_count: u32,
    ) -> WatcherResult<()> {
        let project = ProjectName::new(project)?;
        let layout = self.paths.project(&project);
        layout.ensure_dirs().await?;

        let descriptor = JobDescriptor::new(
            BatchId::from_string(batch_id),
            kind,
            project,
            request_count,
            layout.root().to_path_buf(),
        )
        .submitted(BatchState::Submitted);

        let mut registry = WatchRegistry::open(&self.paths, self.store.clone()).await?;
        self.persist(&mut registry, &descriptor).await?;
        info!("Watching {} batch {} for {}", kind, batch_id, descriptor.project);
        Ok(())
    }

    /// Drop a watched job. Returns whether an entry existed.
    pub async fn remove(&self, project: &str) -> WatcherResult<bool> {
        let mut registry = WatchRegistry::open(&self.paths, self.store.clone()).await?;
        let existed = registry.remove(project).is_some();
        if existed {
            registry.save().await?;
            info!("Stopped watching {}", project);
        } else {
            warn!("No watched job for {}", project);
        }
        Ok(existed)
    }
}
