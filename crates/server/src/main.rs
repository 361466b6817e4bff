// crates/server/src/main.rs
//! Meshline gateway binary.
//!
//! Loads configuration, launches one worker process per stage, and serves
//! the HTTP API until Ctrl-C or SIGTERM. Workers are stopped on the way out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use meshline_core::{JobStore, PipelineConfig};
use meshline_server::{create_app, init_metrics, AppState};
use meshline_supervisor::{worker_specs, ProcessSupervisor, TokioLauncher};
use tracing_subscriber::EnvFilter;

/// How often exited worker processes are checked for.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,meshline_server=info,meshline_supervisor=info,meshline_core=info".into()),
        )
        .init();

    let config = PipelineConfig::load().context("loading configuration")?;
    init_metrics();

    let store = JobStore::open(&config.jobs_root)
        .with_context(|| format!("opening job store at {}", config.jobs_root.display()))?;

    let supervisor = Arc::new(ProcessSupervisor::new(
        Arc::new(TokioLauncher),
        worker_specs(&config),
        config.stop_timeout(),
    ));
    if config.spawn_workers {
        supervisor.start().await.context("starting worker processes")?;
        let reaper = supervisor.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            loop {
                tick.tick().await;
                reaper.reap_exited().await;
            }
        });
    } else {
        tracing::info!("Worker spawning disabled; expecting externally managed workers");
    }

    let state = AppState::new(store, &config);
    let app = create_app(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid bind host {}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, jobs_root = %config.jobs_root.display(), "Meshline gateway listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    supervisor.stop().await;
    served.context("serving HTTP")?;
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
    tracing::info!("Shutdown signal received");
}
