// crates/core/src/executor.rs
//! StageExecutor trait: the one capability the coordinator needs from a stage.

use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::job::Artifacts;

/// Performs the work of one pipeline stage for one job.
///
/// Implementations read their inputs from `job_dir`, write outputs into it,
/// and return the artifacts they produced. The coordinator never looks
/// inside; any `Err` marks the stage `failed` with the error's message.
///
/// Implementations include:
/// - `CommandExecutor` (meshline-worker): runs an external program per job
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, job_dir: &Path) -> Result<Artifacts, ExecutorError>;

    /// Executor name for logging.
    fn name(&self) -> &str;
}
