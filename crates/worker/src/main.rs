// crates/worker/src/main.rs
//! Worker process for a single pipeline stage.
//!
//! Claims jobs for `--stage`, runs the configured stage command on each and
//! records the outcome, until Ctrl-C or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meshline_core::{JobStore, PipelineConfig, Stage, WorkerLoop};
use meshline_worker::{metrics::init_metrics, watch_jobs, CommandExecutor};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meshline-worker", version, about = "Run the worker loop for one pipeline stage")]
struct Args {
    /// Stage to serve: segmentation, reconstruction or conversion
    #[arg(long)]
    stage: Stage,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,meshline_worker=info,meshline_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = PipelineConfig::load().context("loading configuration")?;
    let runtime = config.stage_runtime(args.stage)?.clone();
    if let Some(port) = runtime.metrics_port {
        init_metrics(SocketAddr::from(([0, 0, 0, 0], port)))
            .with_context(|| format!("starting metrics endpoint on port {port}"))?;
    }
    let executor = CommandExecutor::new(args.stage.as_str(), runtime)?;

    let store = JobStore::open(&config.jobs_root)
        .with_context(|| format!("opening job store at {}", config.jobs_root.display()))?;

    let wake = Arc::new(Notify::new());
    // Polling still runs if the watcher cannot be set up.
    let _watcher = match watch_jobs(store.root(), wake.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Jobs watcher unavailable; polling only");
            None
        }
    };

    let worker = WorkerLoop::new(store, args.stage, Arc::new(executor))
        .with_poll_interval(config.poll_interval())
        .with_wake(wake);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        trigger.cancel();
    });

    worker.run(shutdown).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
