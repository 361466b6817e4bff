// crates/core/src/lib.rs
//! Pipeline job coordination over a shared directory tree.
//!
//! - [`JobStore`]: durable per-job record with locked, atomic updates
//! - [`JobStore::claim_next`]: at-most-once stage claiming across processes
//! - [`WorkerLoop`]: polling driver for one stage and one [`StageExecutor`]
//! - [`PipelineConfig`]: configuration built once at startup

pub mod claim;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod store;
pub mod worker;

pub use config::{PipelineConfig, ServerConfig, StageRuntime};
pub use error::{ConfigError, ExecutorError, StoreError};
pub use executor::StageExecutor;
pub use job::{Artifacts, Job, JobId, Stage, StageRecord, StageStatus};
pub use store::JobStore;
pub use worker::{Outcome, Tick, WorkerLoop};
