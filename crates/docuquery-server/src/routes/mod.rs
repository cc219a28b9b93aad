//! Route definitions for the REST API.

mod documents;
mod health;
mod ingest;
mod metrics;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.upload_body_limit();

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Ingestion
        .route(
            "/ingest",
            post(ingest::ingest_files).layer(DefaultBodyLimit::max(body_limit)),
        )
        // Query
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/history", get(documents::get_document_history))
        // Metrics
        .route("/metrics", get(metrics::prometheus_metrics))
        // Attach state
        .with_state(state)
}

pub use documents::*;
pub use health::*;
pub use ingest::*;
pub use metrics::*;
