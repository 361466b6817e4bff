// crates/server/src/routes/reconstruct.rs
//! POST /reconstruct: submit an image and block until the pipeline
//! finishes, fails, or times out.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use meshline_core::Job;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Paths of the meshes and preview produced for a finished job.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReconstructResponse {
    pub job_id: String,
    pub obj: Option<String>,
    pub stl: Option<String>,
    pub preview: Option<String>,
}

impl From<Job> for ReconstructResponse {
    fn from(mut job: Job) -> Self {
        Self {
            obj: job.artifacts.remove("visual_obj"),
            stl: job.artifacts.remove("visual_stl"),
            preview: job.artifacts.remove("reconstruction_preview"),
            job_id: job.job_id,
        }
    }
}

/// Multipart fields: `image` (required, raw bytes) and `prompt` (optional text).
async fn reconstruct(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<ReconstructResponse>> {
    let mut image: Option<Bytes> = None;
    let mut prompt: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                image = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.body_text()))?,
                );
            }
            "prompt" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if !text.trim().is_empty() {
                    prompt = Some(text);
                }
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let image = image
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing image field".into()))?;

    let job_id = state.gateway.submit(image, prompt).await?;
    let job = state
        .gateway
        .await_completion(&job_id, state.terminal_stage, state.wait_timeout)
        .await?;

    tracing::info!(job_id = %job_id, "Reconstruction finished");
    Ok(Json(job.into()))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/reconstruct", post(reconstruct))
}
