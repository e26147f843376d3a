//! Watcher binary.

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sreel_models::JobKind;
use sreel_watcher::{Watcher, WatcherConfig, WatcherResult};

#[derive(Parser)]
#[command(name = "sreel-watcher", version, about = "Batch watch service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch continuously.
    Start,
    /// Run one watch cycle and exit.
    Tick,
    /// Print the watched jobs.
    Status,
    /// Manually register a batch job (registry repair).
    Add {
        /// Owning project.
        #[arg(long)]
        project: String,
        /// Kind of batch job.
        #[arg(long)]
        kind: KindArg,
        /// Provider-assigned batch id.
        #[arg(long)]
        batch_id: String,
        /// Number of submitted requests, if known.
        #[arg(long, default_value_t = 0)]
        request_count: u32,
    },
    /// Stop watching a project.
    Remove {
        #[arg(long)]
        project: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    PromptBatch,
    ImageBatch,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::PromptBatch => JobKind::PromptBatch,
            KindArg::ImageBatch => JobKind::ImageBatch,
        }
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("sreel=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let cli = Cli::parse();

    let config = WatcherConfig::from_env();
    let watcher = match Watcher::from_env(config) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create the watcher: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch(&watcher, cli.command).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn dispatch(watcher: &Watcher, command: Command) -> WatcherResult<()> {
    match command {
        Command::Start => watcher.run_loop().await,
        Command::Tick => {
            let report = watcher.run_cycle().await?;
            info!("Cycle done: {}", report);
            Ok(())
        }
        Command::Status => {
            let status = watcher.status().await?;
            println!("{}", status);
            Ok(())
        }
        Command::Add {
            project,
            kind,
            batch_id,
            request_count,
        } => {
            watcher
                .add(&project, kind.into(), &batch_id, request_count)
                .await
        }
        Command::Remove { project } => watcher.remove(&project).await.map(|_| ()),
    }
}
