// crates/supervisor/src/lib.rs
//! Lifecycle of the per-stage worker processes.

pub mod error;
pub mod launcher;
pub mod supervisor;

pub use error::SupervisorError;
pub use launcher::{ProcessHandle, ProcessLauncher, ProcessSpec, TokioLauncher};
pub use supervisor::{worker_specs, ExitedProcess, ProcessSupervisor};
