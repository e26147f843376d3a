//! Pipeline binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use sreel_models::ProjectName;
use sreel_pipeline::phases::{self, PhaseName};
use sreel_pipeline::script::{list_local_scripts, sync_remote_scripts};
use sreel_pipeline::{logging, PipelineConfig, PipelineError, PipelineResult, RunContext};

#[derive(Parser)]
#[command(name = "sreel-pipeline", version, about = "Story-to-video pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run projects end to end.
    Run {
        /// Script file to run.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Run every script in the input directory.
        #[arg(long)]
        all: bool,
    },
    /// Run a single phase of one project.
    Phase {
        /// Phase to run.
        name: PhaseName,
        /// Project the phase belongs to.
        #[arg(long)]
        project: String,
    },
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    let log_buffer = logging::init_tracing();

    let cli = Cli::parse();

    let config = PipelineConfig::from_env();
    let ctx = Arc::new(RunContext::from_env(config, log_buffer));
    let _interrupt = ctx.install_interrupt_handler();

    let result = match cli.command {
        Command::Run { script, all } => run(&ctx, script, all).await,
        Command::Phase { name, project } => run_one_phase(&ctx, name, &project).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => {
            ctx.flush_error_log();
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            ctx.flush_error_log();
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(true)` when every project finished without a failed phase.
async fn run(ctx: &Arc<RunContext>, script: Option<PathBuf>, all: bool) -> PipelineResult<bool> {
    if let Some(sync) = ctx.sync() {
        let fetched = sync_remote_scripts(ctx.paths(), &sync).await;
        if fetched > 0 {
            info!("Fetched {} new script(s) from the archive", fetched);
        }
    }

    let scripts: Vec<PathBuf> = match script {
        Some(path) => vec![path],
        None if all => list_local_scripts(ctx.paths())?,
        None => {
            return Err(PipelineError::config_error(
                "pass --script <file> or --all",
            ))
        }
    };
    if scripts.is_empty() {
        warn!("No scripts in {}", ctx.paths().input_dir().display());
        return Ok(true);
    }
    info!("Running {} project(s)", scripts.len());

    let mut all_ok = true;
    let mut summaries: Vec<(PathBuf, String)> = Vec::new();
    for path in &scripts {
        match phases::run_project(ctx, path).await {
            Ok(outcomes) => {
                if outcomes.iter().any(|(_, o)| o.is_failure()) {
                    all_ok = false;
                }
                let line = outcomes
                    .iter()
                    .map(|(phase, outcome)| format!("{} {}", phase, outcome))
                    .collect::<Vec<_>>()
                    .join("; ");
                summaries.push((path.clone(), line));
            }
            Err(e) => {
                error!("Project {} did not start: {}", path.display(), e);
                all_ok = false;
                summaries.push((path.clone(), format!("did not start: {}", e)));
            }
        }
    }

    for (path, line) in &summaries {
        info!("{}: {}", path.display(), line);
    }
    info!("\n{}", ctx.cost_snapshot().summary_block());
    Ok(all_ok)
}

async fn run_one_phase(
    ctx: &Arc<RunContext>,
    name: PhaseName,
    project: &str,
) -> PipelineResult<bool> {
    let project = ProjectName::new(project)?;
    let layout = ctx.layout(&project);
    ctx.set_active_project(&project);

    let outcome = phases::run_phase(ctx, &layout, name).await?;
    info!("Phase {}: {}", name, outcome);
    Ok(!outcome.is_failure())
}
