// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use meshline_core::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Artifact not found: {job_id}/{name}")]
    ArtifactNotFound { job_id: String, name: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Gateway(GatewayError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::ArtifactNotFound { job_id, name } => {
                tracing::warn!(job_id = %job_id, artifact = %name, "Artifact not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Artifact not found", format!("{job_id}/{name}")),
                )
            }
            ApiError::Gateway(gateway_err) => match gateway_err {
                GatewayError::Store(StoreError::NotFound { job_id }) => {
                    tracing::warn!(job_id = %job_id, "Job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {}", job_id)),
                    )
                }
                GatewayError::Store(store_err) => {
                    tracing::error!(error = %store_err, "Job store error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Job store error", store_err.to_string()),
                    )
                }
                GatewayError::StageFailed { stage, message } => {
                    tracing::warn!(stage = %stage, message = %message, "Pipeline stage failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details(
                            format!("Stage {stage} failed"),
                            message.clone(),
                        ),
                    )
                }
                GatewayError::Timeout { stage, waited } => {
                    tracing::warn!(stage = %stage, waited_secs = waited.as_secs(), "Pipeline timed out");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details(
                            "Pipeline timed out",
                            gateway_err.to_string(),
                        ),
                    )
                }
            },
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
