// crates/server/src/routes/jobs.rs
//! Job status and artifact download.
//!
//! - GET /jobs/{job_id}: the job's state record, verbatim
//! - GET /jobs/{job_id}/artifacts/{name}: raw bytes of a recorded artifact

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use meshline_core::Job;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /jobs/{job_id}: full stage/artifact map.
async fn get_job(
    State(state): State<Arc<AppState>>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.gateway.status(&job_id).await?))
}

/// GET /jobs/{job_id}/artifacts/{name}
async fn get_artifact(
    State(state): State<Arc<AppState>>,
    UrlPath((job_id, name)): UrlPath<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let not_found = || ApiError::ArtifactNotFound {
        job_id: job_id.clone(),
        name: name.clone(),
    };

    let path = state
        .gateway
        .artifact_path(&job_id, &name)
        .await?
        .ok_or_else(not_found)?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(ApiError::Internal(format!(
                "reading {}: {e}",
                path.display()
            )))
        }
    };

    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("obj") => "model/obj",
        Some("stl") => "model/stl",
        _ => "application/octet-stream",
    }
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/artifacts/{name}", get(get_artifact))
}
