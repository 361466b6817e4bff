// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::job::{Stage, StageStatus};

/// Errors raised by the file-backed job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("Job already exists: {job_id}")]
    AlreadyExists { job_id: String },

    #[error("Corrupt state record for job {job_id}: {message}")]
    Corrupt { job_id: String, message: String },

    #[error("Invalid transition for stage {stage}: {from} -> {to}")]
    InvalidTransition {
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("Update of job {job_id} would drop artifact {name}")]
    ArtifactRemoved { job_id: String, name: String },

    #[error("IO error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blocking store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn not_found(job_id: impl Into<String>) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
        }
    }

    /// Map an IO error on a job path, folding `NotFound` into the
    /// store-level variant so callers get one "unknown job" signal.
    pub fn io(job_id: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(job_id),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                job_id: job_id.to_string(),
            },
            _ => Self::Io {
                path: path.into(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by a stage executor while processing a claimed job.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("failed to spawn executor: {0}")]
    SpawnFailed(String),

    #[error("executor exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("executor timed out after {0}s")]
    Timeout(u64),

    #[error("executor returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while assembling [`crate::PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to resolve path {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("No executor command configured for stage {0}")]
    MissingCommand(Stage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_folds_into_store_not_found() {
        let err = StoreError::io(
            "abc",
            "/jobs/abc/state.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Job not found: abc");
    }

    #[test]
    fn test_io_other_keeps_path() {
        let err = StoreError::io(
            "abc",
            "/jobs/abc/state.json",
            std::io::Error::new(std::io::ErrorKind::Other, "disk error"),
        );
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(err.to_string().contains("/jobs/abc/state.json"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = StoreError::InvalidTransition {
            stage: Stage::Segmentation,
            from: StageStatus::Done,
            to: StageStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for stage segmentation: done -> pending"
        );
    }

    #[test]
    fn test_executor_failed_display_is_bare_message() {
        let err = ExecutorError::failed("no object found");
        assert_eq!(err.to_string(), "no object found");
    }
}
