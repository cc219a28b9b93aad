//! docuquery-server - REST API server for docuquery.
//!
//! Exposes document upload, result and history lookup, Prometheus metrics and a
//! health check over the ingestion pipeline and query service of `docuquery-core`.
//!
//! # Example
//!
//! ```ignore
//! use docuquery_server::{create_server, create_state};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DocuqueryConfig::load()?;
//!     let app = create_server(create_state(&config).await?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod factory;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use factory::{build_state, create_state, StartupError};
pub use state::AppState;

use axum::{middleware as axum_middleware, Router};
use tower_http::trace::TraceLayer;

/// Create the server with all routes and middleware.
pub fn create_server(state: AppState) -> Router {
    routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
