// crates/supervisor/src/supervisor.rs
//! One long-lived worker process per stage.
//!
//! Exited workers are reported but never restarted; their stage stalls until
//! an operator intervenes.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use meshline_core::{PipelineConfig, Stage};
use tokio::sync::Mutex;

use crate::error::SupervisorError;
use crate::launcher::{ProcessHandle, ProcessLauncher, ProcessSpec};

struct Tracked {
    name: String,
    handle: Box<dyn ProcessHandle>,
}

/// A tracked process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitedProcess {
    pub name: String,
    pub status: ExitStatus,
}

pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    specs: Vec<ProcessSpec>,
    stop_timeout: Duration,
    running: Mutex<Vec<Tracked>>,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        specs: Vec<ProcessSpec>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            specs,
            stop_timeout,
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    /// Launch every spec. All-or-nothing: if one launch fails, the ones
    /// already started are stopped before the error is returned.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().await;
        if !running.is_empty() {
            return Err(SupervisorError::AlreadyStarted(running.len()));
        }

        let mut launched = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            match self.launcher.launch(spec) {
                Ok(handle) => launched.push(Tracked {
                    name: spec.name.clone(),
                    handle,
                }),
                Err(e) => {
                    tracing::error!(name = %spec.name, error = %e, "Worker launch failed, rolling back");
                    shutdown_all(&mut launched, self.stop_timeout).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(count = launched.len(), "Started worker processes");
        *running = launched;
        Ok(())
    }

    /// SIGTERM every tracked process, wait up to the stop timeout, then
    /// SIGKILL whatever is left. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if running.is_empty() {
            return;
        }
        shutdown_all(&mut running, self.stop_timeout).await;
        tracing::info!("Stopped worker processes");
    }

    /// Drop processes that exited on their own and report them.
    pub async fn reap_exited(&self) -> Vec<ExitedProcess> {
        let mut running = self.running.lock().await;
        let mut exited = Vec::new();
        let mut still_running = Vec::with_capacity(running.len());

        for mut tracked in running.drain(..) {
            match tracked.handle.try_status() {
                Ok(Some(status)) => {
                    tracing::warn!(
                        name = %tracked.name,
                        %status,
                        "Worker process exited; its stage will not make progress until restarted"
                    );
                    exited.push(ExitedProcess {
                        name: tracked.name,
                        status,
                    });
                }
                Ok(None) => still_running.push(tracked),
                Err(e) => {
                    tracing::warn!(name = %tracked.name, error = %e, "Failed to poll worker process");
                    still_running.push(tracked);
                }
            }
        }

        *running = still_running;
        exited
    }

    /// Names of the processes currently tracked.
    pub async fn running(&self) -> Vec<String> {
        self.running
            .lock()
            .await
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }
}

async fn shutdown_all(tracked: &mut Vec<Tracked>, timeout: Duration) {
    for t in tracked.iter_mut() {
        if let Err(e) = t.handle.terminate() {
            tracing::warn!(name = %t.name, error = %e, "SIGTERM failed");
        }
    }

    let deadline = tokio::time::Instant::now() + timeout;
    for t in tracked.iter_mut() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match t.handle.wait(remaining).await {
            Ok(Some(status)) => {
                tracing::debug!(name = %t.name, %status, "Worker process exited");
            }
            Ok(None) => {
                tracing::warn!(name = %t.name, "Worker ignored SIGTERM, killing");
                if let Err(e) = t.handle.kill().await {
                    tracing::error!(name = %t.name, error = %e, "Failed to kill worker process");
                }
            }
            Err(e) => {
                tracing::warn!(name = %t.name, error = %e, "Wait failed, killing");
                if let Err(e) = t.handle.kill().await {
                    tracing::error!(name = %t.name, error = %e, "Failed to kill worker process");
                }
            }
        }
    }
    tracked.clear();
}

/// One `<worker_binary> --stage <name>` spec per stage, carrying that
/// stage's environment and working directory plus the absolute jobs root
/// and config file path.
pub fn worker_specs(config: &PipelineConfig) -> Vec<ProcessSpec> {
    let program = config.worker_binary();
    let shared_env = config.worker_env();
    Stage::ALL
        .iter()
        .map(|stage| {
            let mut spec = ProcessSpec::new(format!("worker-{stage}"), program.clone())
                .arg("--stage")
                .arg(stage.as_str());
            if let Some(runtime) = config.stages.get(stage.as_str()) {
                spec.env = runtime.env.clone();
                spec.working_dir = runtime.working_dir.clone();
            }
            spec.env.extend(shared_env.clone());
            spec
        })
        .collect()
}
