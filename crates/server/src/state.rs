// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshline_core::{JobStore, PipelineConfig, Stage};

use crate::gateway::Gateway;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub gateway: Gateway,
    /// Stage whose completion ends a `/reconstruct` request.
    pub terminal_stage: Stage,
    /// How long `/reconstruct` waits before failing the terminal stage.
    pub wait_timeout: Duration,
    /// Request body cap for uploads.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(store: JobStore, config: &PipelineConfig) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            gateway: Gateway::from_config(store, config),
            terminal_stage: Stage::TERMINAL,
            wait_timeout: config.wait_timeout(),
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig {
            wait_timeout_secs: 42,
            ..PipelineConfig::default()
        };
        let state = AppState::new(JobStore::open(dir.path()).unwrap(), &config);

        assert_eq!(state.terminal_stage, Stage::Conversion);
        assert_eq!(state.wait_timeout, Duration::from_secs(42));
        assert_eq!(state.gateway.store().root(), dir.path());
        assert!(state.uptime_secs() < 5);
    }
}
