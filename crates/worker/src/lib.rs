// crates/worker/src/lib.rs
//! Worker-side pieces: the command-backed stage executor, the
//! directory-change wake source for [`meshline_core::WorkerLoop`] and the
//! per-process metrics endpoint.

pub mod command;
pub mod metrics;
pub mod wake;

pub use command::CommandExecutor;
pub use wake::watch_jobs;
