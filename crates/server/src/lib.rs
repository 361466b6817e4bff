// crates/server/src/lib.rs
//! Meshline HTTP gateway.
//!
//! Accepts image submissions, turns each into a job on the shared job
//! store, and blocks the request until the worker processes have carried it
//! through every stage.

pub mod error;
pub mod gateway;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::*;
pub use gateway::{Gateway, GatewayError};
pub use crate::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (reconstruct, jobs, health, metrics)
/// - Upload size limit from the server config
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
