use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelforge::config::WorkerConfig;
use reelforge::summary;
use reelforge_pipeline::backend::Backend;
use reelforge_pipeline::fetcher::ArtifactFetcher;
use reelforge_pipeline::orchestrator::{Orchestrator, RunMode, RunOptions};
use reelforge_pipeline::pacing::Pacer;
use reelforge_pipeline::registry::TaskRegistry;
use reelforge_pipeline::worklist;

#[derive(Parser)]
#[command(name = "reelforge", about = "Submit, poll and download generation jobs for a run directory")]
struct Cli {
    /// Run directory holding the numbered stage folders.
    run_dir: PathBuf,
    #[arg(long, value_enum, default_value = "video")]
    worklist: WorklistArg,
    /// JSON manifest for image runs.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Overall polling timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Seconds between polling sweeps.
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Minimum milliseconds between backend calls.
    #[arg(long)]
    pace_ms: Option<u64>,
    /// Submit pending items and exit without polling.
    #[arg(long, conflicts_with = "poll_only")]
    submit_only: bool,
    /// Only poll jobs already recorded in the registry.
    #[arg(long)]
    poll_only: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum WorklistArg {
    Video,
    Image,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env().context("invalid configuration")?;
    init_tracing(config.json_logs);

    if let Some(secs) = cli.timeout {
        config.poll_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.poll_interval {
        if secs == 0 {
            bail!("--poll-interval must be at least 1 second");
        }
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = cli.pace_ms {
        config.request_gap = Duration::from_millis(ms);
    }

    if !cli.run_dir.is_dir() {
        bail!("run directory {} does not exist", cli.run_dir.display());
    }

    let mode = if cli.submit_only {
        RunMode::SubmitOnly
    } else if cli.poll_only {
        RunMode::PollOnly
    } else {
        RunMode::Full
    };

    let items = match (mode, cli.worklist) {
        (RunMode::PollOnly, _) => Vec::new(),
        (_, WorklistArg::Video) => worklist::scan_video_worklist(&cli.run_dir).await?,
        (_, WorklistArg::Image) => {
            let manifest = cli
                .manifest
                .as_deref()
                .context("--manifest is required for image runs")?;
            worklist::load_image_manifest(&cli.run_dir, manifest).await?
        }
    };
    tracing::info!(run_dir = %cli.run_dir.display(), items = items.len(), "Worklist ready");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let backend = Backend::from_config(config.backend.clone(), http.clone())
        .await
        .context("failed to initialise backend")?;

    let pacer = Pacer::new(config.request_gap);
    let fetcher = ArtifactFetcher::new(http, pacer.clone());
    let registry = TaskRegistry::load_in(&cli.run_dir).await;
    let options = RunOptions {
        poll_interval: config.poll_interval,
        timeout: config.poll_timeout,
        mode,
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let mut orchestrator = Orchestrator::new(Arc::new(backend), fetcher, registry, pacer, options)
        .with_cancellation(cancel);
    let outcome = orchestrator.run(&items).await?;

    println!("{}", summary::render(&outcome, &orchestrator.registry().counts()));
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reelforge=info,reelforge_pipeline=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Cancel the run on the first Ctrl-C; the orchestrator stops at its next
/// checkpoint and the registry keeps in-flight jobs for a later run.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current call");
            cancel.cancel();
        }
    });
}
