// crates/server/src/routes/mod.rs
//! HTTP route handlers for the meshline gateway.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod reconstruct;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - POST /reconstruct - Submit an image and wait for the pipeline
/// - GET  /jobs/{job_id} - Full state record of a job
/// - GET  /jobs/{job_id}/artifacts/{name} - Download a recorded artifact
/// - GET  /health - Health check
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(reconstruct::router())
        .merge(jobs::router())
        .merge(health::router())
        .merge(metrics::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use meshline_core::{JobStore, PipelineConfig};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::state::AppState;

    /// State over a fresh jobs root with fast polling and a short wait.
    pub fn test_state() -> (TempDir, Arc<AppState>) {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            wait_poll_interval_secs: 0.02,
            wait_timeout_secs: 1,
            ..PipelineConfig::default()
        };
        let state = AppState::new(JobStore::open(dir.path()).unwrap(), &config);
        (dir, state)
    }

    /// Helper to make a GET request to the app.
    pub async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }
}
