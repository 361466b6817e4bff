// crates/core/src/worker.rs
//! Polling driver for one stage type.
//!
//! Each tick: claim the next eligible job, run the executor on its
//! directory, record artifacts and the final status. Executor failures are
//! recorded against the job and never stop the loop.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutorError, StoreError};
use crate::executor::StageExecutor;
use crate::job::{Artifacts, JobId, Stage, StageStatus};
use crate::store::JobStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How an executed stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// Result of a single loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was eligible.
    Idle,
    Processed { job_id: JobId, outcome: Outcome },
}

pub struct WorkerLoop {
    store: JobStore,
    stage: Stage,
    executor: Arc<dyn StageExecutor>,
    poll_interval: Duration,
    wake: Option<Arc<Notify>>,
}

impl WorkerLoop {
    pub fn new(store: JobStore, stage: Stage, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            store,
            stage,
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wake: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Cut idle sleeps short when `wake` is notified. Polling still runs
    /// on its interval whether or not notifications arrive.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Claim and process at most one job.
    ///
    /// Only a failed claim scan is an error. Problems recording the outcome
    /// are logged; the job is still reported as processed.
    pub async fn tick(&self) -> Result<Tick, StoreError> {
        let stage = self.stage;
        let Some(job_id) = self.store.blocking(move |s| s.claim_next_for(stage)).await? else {
            return Ok(Tick::Idle);
        };

        let outcome = match self.execute(&job_id).await {
            Ok(artifacts) => {
                tracing::info!(job_id = %job_id, %stage, artifacts = artifacts.len(), "Stage done");
                self.record_artifacts(&job_id, artifacts).await;
                self.record_status(&job_id, StageStatus::Done, None).await;
                Outcome::Done
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(job_id = %job_id, %stage, error = %message, "Stage failed");
                self.record_status(&job_id, StageStatus::Failed, Some(message.clone()))
                    .await;
                Outcome::Failed(message)
            }
        };

        let label = match outcome {
            Outcome::Done => "done",
            Outcome::Failed(_) => "failed",
        };
        metrics::counter!(
            "meshline_stage_executions_total",
            "stage" => stage.as_str(),
            "outcome" => label
        )
        .increment(1);

        Ok(Tick::Processed { job_id, outcome })
    }

    /// Poll until `shutdown` fires. A job already executing is finished
    /// before the loop exits so no stage is left `in_progress` by a clean stop.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            stage = %self.stage,
            executor = self.executor.name(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Worker loop started"
        );

        while !shutdown.is_cancelled() {
            match self.tick().await {
                Ok(Tick::Processed { .. }) => continue,
                Ok(Tick::Idle) => {}
                Err(e) => {
                    tracing::warn!(stage = %self.stage, error = %e, "Claim scan failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = wait_for_wake(self.wake.as_deref()) => {}
            }
        }

        tracing::info!(stage = %self.stage, "Worker loop stopped");
    }

    async fn execute(&self, job_id: &str) -> Result<Artifacts, ExecutorError> {
        let job_dir = self
            .store
            .job_dir(job_id)
            .map_err(|e| ExecutorError::failed(e.to_string()))?;

        // A panicking executor is recorded like any other failure.
        let executor = Arc::clone(&self.executor);
        match tokio::spawn(async move { executor.execute(&job_dir).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ExecutorError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ExecutorError::Panicked(e.to_string())),
        }
    }

    async fn record_artifacts(&self, job_id: &str, artifacts: Artifacts) {
        let id = job_id.to_string();
        if let Err(e) = self
            .store
            .blocking(move |s| s.set_artifacts(&id, &artifacts))
            .await
        {
            tracing::error!(job_id, stage = %self.stage, error = %e, "Failed to record artifacts");
        }
    }

    async fn record_status(&self, job_id: &str, status: StageStatus, error: Option<String>) {
        let id = job_id.to_string();
        let stage = self.stage;
        match self
            .store
            .blocking(move |s| s.set_stage_status(&id, stage, status, error))
            .await
        {
            Ok(()) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                // Someone else resolved the stage while we ran (gateway timeout).
                tracing::warn!(job_id, %stage, %from, %status, "Stage already resolved; outcome not recorded");
            }
            Err(e) => {
                tracing::error!(job_id, %stage, %status, error = %e, "Failed to record stage status");
            }
        }
    }
}

async fn wait_for_wake(wake: Option<&Notify>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
