//! Phase dispatch and the full-run orchestrator.

pub mod images;
pub mod motion;
pub mod prompts;
pub mod settings;
pub mod upload;
pub mod videos;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use tracing::{info, warn};

use sreel_providers::{ImageGatewayClient, TextGatewayClient, VideoGatewayClient};
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::PipelineResult;
use crate::script::{load_script, mark_active};

/// How a phase ended. `Failed` is an expected outcome (some items did not
/// make it); errors are reserved for conditions that stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped,
    Failed { reason: String },
}

impl PhaseOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Skipped => f.write_str("skipped (already done)"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Every phase the CLI can run by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseName {
    Settings,
    Prompts,
    RetrievePrompts,
    SubmitImages,
    RetrieveImages,
    Motion,
    Images,
    Videos,
    Upload,
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Settings => "settings",
            Self::Prompts => "prompts",
            Self::RetrievePrompts => "retrieve-prompts",
            Self::SubmitImages => "submit-images",
            Self::RetrieveImages => "retrieve-images",
            Self::Motion => "motion",
            Self::Images => "images",
            Self::Videos => "videos",
            Self::Upload => "upload",
        })
    }
}

/// Phase order for a full run. In batch mode the run stops after the
/// prompt submission and the watcher drives the remaining phases.
const RUN_ORDER: &[PhaseName] = &[
    PhaseName::Settings,
    PhaseName::Prompts,
    PhaseName::Images,
    PhaseName::Motion,
    PhaseName::Videos,
    PhaseName::Upload,
];

/// Run one phase under the global phase timeout.
pub async fn run_phase(
    ctx: &RunContext,
    layout: &ProjectLayout,
    name: PhaseName,
) -> PipelineResult<PhaseOutcome> {
    match tokio::time::timeout(ctx.config().phase_timeout, dispatch(ctx, layout, name)).await {
        Ok(result) => result,
        Err(_) => Ok(PhaseOutcome::failed(format!(
            "phase {} exceeded the {}s timeout",
            name,
            ctx.config().phase_timeout.as_secs()
        ))),
    }
}

async fn dispatch(
    ctx: &RunContext,
    layout: &ProjectLayout,
    name: PhaseName,
) -> PipelineResult<PhaseOutcome> {
    match name {
        PhaseName::Settings => {
            let text = TextGatewayClient::from_env()?;
            let script = script_for(ctx, layout)?;
            settings::run(ctx, layout, &text, &script).await
        }
        PhaseName::Prompts => {
            let text = TextGatewayClient::from_env()?;
            let script = script_for(ctx, layout)?;
            if ctx.config().batch_enabled {
                prompts::submit_batch(ctx, layout, Arc::new(text), &script).await
            } else {
                prompts::run_sync(ctx, layout, &text, &script).await
            }
        }
        PhaseName::RetrievePrompts => {
            let text = TextGatewayClient::from_env()?;
            prompts::retrieve(ctx, layout, Arc::new(text)).await
        }
        PhaseName::SubmitImages => {
            let image = ImageGatewayClient::from_env()?;
            images::submit_batch(ctx, layout, Arc::new(image)).await
        }
        PhaseName::RetrieveImages => {
            let image = ImageGatewayClient::from_env()?;
            images::retrieve(ctx, layout, Arc::new(image)).await
        }
        PhaseName::Images => {
            let image = ImageGatewayClient::from_env()?;
            if ctx.config().batch_enabled {
                images::submit_batch(ctx, layout, Arc::new(image)).await
            } else {
                images::run_sync(ctx, layout, &image).await
            }
        }
        PhaseName::Motion => {
            let text = TextGatewayClient::from_env()?;
            motion::run(ctx, layout, &text).await
        }
        PhaseName::Videos => {
            let video = VideoGatewayClient::from_env()?;
            videos::run(ctx, layout, &video).await
        }
        PhaseName::Upload => upload::run(ctx, layout).await,
    }
}

/// Run every phase of one project in order, stopping at the first failure.
/// Errors are folded into `Failed` outcomes so a multi-project run can
/// report one project's trouble and move on to the next.
pub async fn run_project(
    ctx: &RunContext,
    script_path: &Path,
) -> PipelineResult<Vec<(PhaseName, PhaseOutcome)>> {
    let (project, _) = load_script(script_path)?;
    let layout = ctx.layout(&project);
    mark_active(ctx.paths(), &project, script_path)?;
    ctx.set_active_project(&project);
    info!("Starting project {}", project);

    let mut outcomes = Vec::new();
    for phase in RUN_ORDER {
        let outcome = match run_phase(ctx, &layout, *phase).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::failed(e.to_string()),
        };
        info!("Phase {}: {}", phase, outcome);

        if let PhaseOutcome::Failed { reason } = &outcome {
            ctx.notifier()
                .send_failure(project.as_str(), &phase.to_string(), reason)
                .await;
        }
        let failed = outcome.is_failure();
        outcomes.push((*phase, outcome));
        if failed {
            break;
        }

        if *phase == PhaseName::Prompts && ctx.config().batch_enabled {
            info!("Prompt batch submitted, the watcher drives the remaining phases");
            break;
        }
    }
    Ok(outcomes)
}

/// The script a named project was started from.
fn script_for(ctx: &RunContext, layout: &ProjectLayout) -> PipelineResult<String> {
    let path = ctx
        .paths()
        .input_dir()
        .join(format!("{}.txt", layout.project().as_str()));
    let (_, script) = load_script(&path)?;
    Ok(script)
}

/// Append one line to a text or JSONL artifact, creating it on first use.
pub(crate) fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()
}

/// Trim a work set to the configured test item limit, if one is set.
pub(crate) fn apply_item_limit<T>(items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(n) if items.len() > n => {
            warn!("Item limit active, running {} of {} items", n, items.len());
            items.into_iter().take(n).collect()
        }
        _ => items,
    }
}
