// crates/server/src/gateway.rs
//! Synchronous front for the asynchronous pipeline.
//!
//! `submit` creates a job and returns as soon as its record exists. Workers
//! pick it up out of band; `await_completion` polls the record until the
//! terminal stage resolves, any stage fails, or the deadline passes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use meshline_core::{Job, JobId, JobStore, PipelineConfig, Stage, StageStatus, StoreError};
use thiserror::Error;

/// Fixed name of the submitted image inside the job directory.
pub const INPUT_FILE: &str = "input.png";
/// Optional text prompt written next to the image.
pub const PROMPT_FILE: &str = "prompt.txt";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("Timeout waiting for {stage}")]
    Timeout { stage: Stage, waited: Duration },
}

#[derive(Debug, Clone)]
pub struct Gateway {
    store: JobStore,
    poll_interval: Duration,
}

impl Gateway {
    pub fn new(store: JobStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    pub fn from_config(store: JobStore, config: &PipelineConfig) -> Self {
        Self::new(store, config.wait_poll_interval())
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Create a job holding `image` (and `prompt`, if any). The job is only
    /// visible to workers once both files are written.
    pub async fn submit(&self, image: Bytes, prompt: Option<String>) -> Result<JobId, GatewayError> {
        let job_id = self
            .store
            .blocking(move |s| {
                s.create_job_with(|dir| {
                    std::fs::write(dir.join(INPUT_FILE), &image)?;
                    if let Some(prompt) = &prompt {
                        std::fs::write(dir.join(PROMPT_FILE), prompt)?;
                    }
                    Ok(())
                })
            })
            .await?;

        metrics::counter!("meshline_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Wait for `terminal` to resolve.
    ///
    /// Returns early with [`GatewayError::StageFailed`] as soon as any stage
    /// has failed. On timeout the terminal stage is marked failed so later
    /// status reads see it; the worker running it is not interrupted.
    pub async fn await_completion(
        &self,
        job_id: &str,
        terminal: Stage,
        timeout: Duration,
    ) -> Result<Job, GatewayError> {
        let start = Instant::now();
        let deadline = start + timeout;

        let result = loop {
            let job = self.status(job_id).await?;
            if let Some(resolved) = resolution(job, terminal) {
                break resolved;
            }

            let now = Instant::now();
            if now >= deadline {
                break self.fail_on_timeout(job_id, terminal, timeout).await;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        let outcome = match &result {
            Ok(_) => {
                metrics::counter!("meshline_jobs_completed_total").increment(1);
                "done"
            }
            Err(GatewayError::StageFailed { stage, .. }) => {
                metrics::counter!("meshline_jobs_failed_total", "stage" => stage.as_str()).increment(1);
                "failed"
            }
            Err(GatewayError::Timeout { .. }) => {
                metrics::counter!("meshline_jobs_timed_out_total").increment(1);
                "timeout"
            }
            Err(GatewayError::Store(_)) => "error",
        };
        metrics::histogram!("meshline_job_wait_seconds", "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn fail_on_timeout(
        &self,
        job_id: &str,
        terminal: Stage,
        waited: Duration,
    ) -> Result<Job, GatewayError> {
        let message = format!("Timeout waiting for {terminal}");
        tracing::warn!(job_id, stage = %terminal, waited_secs = waited.as_secs(), "Gave up waiting for job");

        let id = job_id.to_string();
        let mark = self
            .store
            .blocking(move |s| s.set_stage_status(&id, terminal, StageStatus::Failed, Some(message)))
            .await;

        match mark {
            Ok(()) => Err(GatewayError::Timeout {
                stage: terminal,
                waited,
            }),
            // The worker resolved the stage between our last read and the mark.
            Err(StoreError::InvalidTransition { .. }) => {
                let job = self.status(job_id).await?;
                resolution(job, terminal).unwrap_or(Err(GatewayError::Timeout {
                    stage: terminal,
                    waited,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The full record, verbatim.
    pub async fn status(&self, job_id: &str) -> Result<Job, GatewayError> {
        let id = job_id.to_string();
        Ok(self.store.blocking(move |s| s.load(&id)).await?)
    }

    /// Canonical path of a recorded artifact. `None` if the job has no
    /// artifact of that name, the file is gone, or it resolves outside the
    /// job directory.
    pub async fn artifact_path(&self, job_id: &str, name: &str) -> Result<Option<PathBuf>, GatewayError> {
        let job = self.status(job_id).await?;
        let Some(recorded) = job.artifacts.get(name) else {
            return Ok(None);
        };

        let job_dir = self.store.job_dir(job_id)?;
        let job_dir = tokio::fs::canonicalize(&job_dir)
            .await
            .map_err(|e| StoreError::io(job_id, &job_dir, e))?;
        let path = match tokio::fs::canonicalize(job_dir.join(recorded)).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: PathBuf::from(recorded),
                    source,
                }
                .into())
            }
        };

        if !path.starts_with(&job_dir) {
            tracing::warn!(job_id, artifact = name, path = %path.display(), "Artifact outside job directory, not served");
            return Ok(None);
        }
        Ok(Some(path))
    }
}

/// `Some` once the wait is over: terminal done, or any stage failed.
fn resolution(job: Job, terminal: Stage) -> Option<Result<Job, GatewayError>> {
    if job.status(terminal) == StageStatus::Done {
        return Some(Ok(job));
    }
    let (stage, message) = job.first_failure()?;
    Some(Err(GatewayError::StageFailed {
        stage,
        message: message.unwrap_or("stage failed").to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshline_core::Artifacts;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn gateway() -> (TempDir, Gateway) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        (dir, Gateway::new(store, Duration::from_millis(20)))
    }

    fn finish(store: &JobStore, job_id: &str, stage: Stage) {
        store
            .set_stage_status(job_id, stage, StageStatus::InProgress, None)
            .unwrap();
        store
            .set_stage_status(job_id, stage, StageStatus::Done, None)
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_writes_inputs_before_record() {
        let (_dir, gw) = gateway();
        let job_id = gw
            .submit(Bytes::from_static(b"\x89PNG fake"), Some("a red chair".into()))
            .await
            .unwrap();

        let job_dir = gw.store().job_dir(&job_id).unwrap();
        assert_eq!(std::fs::read(job_dir.join(INPUT_FILE)).unwrap(), b"\x89PNG fake");
        assert_eq!(
            std::fs::read_to_string(job_dir.join(PROMPT_FILE)).unwrap(),
            "a red chair"
        );
        assert_eq!(gw.status(&job_id).await.unwrap(), Job::new(job_id.clone()));
    }

    #[tokio::test]
    async fn test_submit_without_prompt() {
        let (_dir, gw) = gateway();
        let job_id = gw.submit(Bytes::from_static(b"img"), None).await.unwrap();
        let job_dir = gw.store().job_dir(&job_id).unwrap();
        assert!(job_dir.join(INPUT_FILE).exists());
        assert!(!job_dir.join(PROMPT_FILE).exists());
    }

    #[tokio::test]
    async fn test_upstream_failure_returns_immediately() {
        let (_dir, gw) = gateway();
        let store = gw.store().clone();
        let job_id = store.create_job().unwrap();
        assert_eq!(store.claim_next_for(Stage::Segmentation).unwrap(), Some(job_id.clone()));
        store
            .set_stage_status(
                &job_id,
                Stage::Segmentation,
                StageStatus::Failed,
                Some("no object found".into()),
            )
            .unwrap();

        let started = Instant::now();
        let err = gw
            .await_completion(&job_id, Stage::Conversion, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(500));
        match err {
            GatewayError::StageFailed { stage, message } => {
                assert_eq!(stage, Stage::Segmentation);
                assert_eq!(message, "no object found");
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completes_when_terminal_done() {
        let (_dir, gw) = gateway();
        let store = gw.store().clone();
        let job_id = store.create_job().unwrap();

        let bg_store = store.clone();
        let bg_id = job_id.clone();
        let driver = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(60));
            for stage in Stage::ALL {
                finish(&bg_store, &bg_id, stage);
            }
            let mut artifacts = Artifacts::new();
            artifacts.insert("visual_obj".into(), "meshes/visual.obj".into());
            bg_store.set_artifacts(&bg_id, &artifacts).unwrap();
        });

        let job = gw
            .await_completion(&job_id, Stage::Conversion, Duration::from_secs(5))
            .await
            .unwrap();
        driver.await.unwrap();

        assert_eq!(job.status(Stage::Conversion), StageStatus::Done);
    }

    #[tokio::test]
    async fn test_timeout_marks_terminal_failed() {
        let (_dir, gw) = gateway();
        let job_id = gw.store().create_job().unwrap();

        let err = gw
            .await_completion(&job_id, Stage::Conversion, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { stage: Stage::Conversion, .. }));
        assert_eq!(err.to_string(), "Timeout waiting for conversion");

        let job = gw.status(&job_id).await.unwrap();
        assert_eq!(job.status(Stage::Conversion), StageStatus::Failed);
        assert_eq!(job.error(Stage::Conversion), Some("Timeout waiting for conversion"));
        assert_eq!(job.status(Stage::Segmentation), StageStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_timeout_still_reports_finished_job() {
        let (_dir, gw) = gateway();
        let store = gw.store().clone();
        let job_id = store.create_job().unwrap();
        for stage in Stage::ALL {
            finish(&store, &job_id, stage);
        }

        let job = gw
            .await_completion(&job_id, Stage::Conversion, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(job.status(Stage::Conversion), StageStatus::Done);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_dir, gw) = gateway();
        let err = gw.status("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Store(ref e) if e.is_not_found()));

        let err = gw
            .await_completion("missing", Stage::Conversion, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Store(_)));
    }

    #[tokio::test]
    async fn test_artifact_path() {
        let (_dir, gw) = gateway();
        let job_id = gw.store().create_job().unwrap();
        let job_dir = gw.store().job_dir(&job_id).unwrap();
        std::fs::create_dir(job_dir.join("segmentation")).unwrap();
        let mask = job_dir.join("segmentation/mask.png");
        std::fs::write(&mask, b"mask").unwrap();
        std::fs::write(job_dir.join("object.ply"), b"ply").unwrap();

        let mut artifacts = Artifacts::new();
        artifacts.insert("mask".into(), mask.to_string_lossy().into_owned());
        artifacts.insert("ply".into(), "object.ply".into());
        artifacts.insert("gone".into(), job_dir.join("gone.gif").to_string_lossy().into_owned());
        gw.store().set_artifacts(&job_id, &artifacts).unwrap();

        assert_eq!(
            gw.artifact_path(&job_id, "mask").await.unwrap(),
            Some(std::fs::canonicalize(&mask).unwrap())
        );
        assert_eq!(
            gw.artifact_path(&job_id, "ply").await.unwrap(),
            Some(std::fs::canonicalize(job_dir.join("object.ply")).unwrap())
        );
        assert_eq!(gw.artifact_path(&job_id, "gone").await.unwrap(), None);
        assert_eq!(gw.artifact_path(&job_id, "preview").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_artifact_path_refuses_files_outside_job_dir() {
        let (dir, gw) = gateway();
        let job_id = gw.store().create_job().unwrap();
        let other_id = gw.store().create_job().unwrap();
        let secret = gw.store().job_dir(&other_id).unwrap().join("input.png");
        std::fs::write(&secret, b"someone else's upload").unwrap();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"x").unwrap();

        let mut artifacts = Artifacts::new();
        artifacts.insert("absolute".into(), outside.to_string_lossy().into_owned());
        artifacts.insert("relative".into(), format!("../{other_id}/input.png"));
        gw.store().set_artifacts(&job_id, &artifacts).unwrap();

        assert_eq!(gw.artifact_path(&job_id, "absolute").await.unwrap(), None);
        assert_eq!(gw.artifact_path(&job_id, "relative").await.unwrap(), None);
    }
}
