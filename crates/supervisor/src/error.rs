// crates/supervisor/src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to launch {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Supervisor already has {0} running processes")]
    AlreadyStarted(usize),

    #[error("Failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("IO error waiting on {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
