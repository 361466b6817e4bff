// crates/server/src/routes/health.rs
//! Health check endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the job store cannot be listed.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs_root: String,
    /// Initialized jobs on disk; absent when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

/// GET /health
///
/// 503 if the jobs root is unreadable, since no submission could succeed.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.gateway.store();
    let listed = store.blocking(|s| s.list_jobs()).await;

    let (code, status, jobs) = match listed {
        Ok(ids) => (StatusCode::OK, "ok", Some(ids.len())),
        Err(e) => {
            tracing::warn!(error = %e, "Job store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", None)
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            jobs_root: store.root().display().to_string(),
            jobs,
        }),
    )
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
