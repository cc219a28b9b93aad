//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
};

use crate::state::AppState;

/// Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Pipeline counters and histograms.
/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render_prometheus(),
    )
}
