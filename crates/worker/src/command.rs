// crates/worker/src/command.rs
//! Stage executor that shells out to an external program.
//!
//! Contract with the program:
//! - the job directory is appended as the last argument
//! - exit status 0 and a JSON object `{ "name": "path", ... }` on stdout is success
//! - relative artifact paths are taken relative to the job directory
//! - anything else is a failure; stderr becomes the recorded error

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshline_core::{Artifacts, ExecutorError, StageExecutor, StageRuntime};
use tokio::process::Command as TokioCommand;

/// Longest stderr tail kept as the failure message.
const STDERR_TAIL_BYTES: usize = 500;

pub struct CommandExecutor {
    name: String,
    program: String,
    args: Vec<String>,
    runtime: StageRuntime,
}

impl CommandExecutor {
    /// Build from a stage runtime. Errors if `command` is empty.
    pub fn new(name: impl Into<String>, runtime: StageRuntime) -> Result<Self, ExecutorError> {
        let name = name.into();
        let (program, args) = runtime
            .command
            .split_first()
            .ok_or_else(|| ExecutorError::SpawnFailed(format!("no command configured for {name}")))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            name,
            runtime,
        })
    }
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, job_dir: &Path) -> Result<Artifacts, ExecutorError> {
        let start = Instant::now();
        tracing::info!(executor = %self.name, program = %self.program, job_dir = %job_dir.display(), "Running stage command");

        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .arg(job_dir)
            .envs(&self.runtime.env)
            // Null stdin so the child never blocks waiting for input
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.runtime.working_dir {
            cmd.current_dir(dir);
        }

        let output = match self.runtime.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), cmd.output())
                .await
                .map_err(|_| {
                    tracing::error!(executor = %self.name, elapsed_ms = start.elapsed().as_millis() as u64, "Stage command timed out");
                    ExecutorError::Timeout(secs)
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            tracing::error!(executor = %self.name, error = %e, "Failed to spawn stage command");
            ExecutorError::SpawnFailed(e.to_string())
        })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr_tail(stderr.trim_end());
            tracing::warn!(executor = %self.name, elapsed_ms, exit_code = ?output.status.code(), stderr = %tail, "Stage command failed");
            if tail.is_empty() {
                return Err(ExecutorError::NonZeroExit {
                    code: output.status.code(),
                    stderr: String::new(),
                });
            }
            return Err(ExecutorError::Failed(tail.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let artifacts = parse_artifacts(&stdout, job_dir)?;
        tracing::info!(executor = %self.name, elapsed_ms, artifacts = artifacts.len(), "Stage command finished");
        Ok(artifacts)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Last [`STDERR_TAIL_BYTES`] of `stderr`, cut on a char boundary.
fn stderr_tail(stderr: &str) -> &str {
    if stderr.len() <= STDERR_TAIL_BYTES {
        return stderr.trim_start();
    }
    let mut cut = stderr.len() - STDERR_TAIL_BYTES;
    while !stderr.is_char_boundary(cut) {
        cut += 1;
    }
    stderr[cut..].trim_start()
}

fn parse_artifacts(stdout: &str, job_dir: &Path) -> Result<Artifacts, ExecutorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Artifacts::new());
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
        let head: String = trimmed.chars().take(STDERR_TAIL_BYTES).collect();
        tracing::warn!(stdout = %head, "Stage command returned non-JSON");
        ExecutorError::InvalidOutput(e.to_string())
    })?;
    let serde_json::Value::Object(map) = value else {
        return Err(ExecutorError::InvalidOutput(
            "expected a JSON object of artifact paths".into(),
        ));
    };

    map.into_iter()
        .map(|(name, path)| match path {
            serde_json::Value::String(p) => Ok((name, resolve(job_dir, &p))),
            other => Err(ExecutorError::InvalidOutput(format!(
                "artifact {name} is not a path: {other}"
            ))),
        })
        .collect()
}

fn resolve(job_dir: &Path, path: &str) -> String {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        path.to_string()
    } else {
        job_dir.join(p).to_string_lossy().into_owned()
    }
}
