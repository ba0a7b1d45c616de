//! Metrics endpoint handler for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing /metrics request");

    let snapshot = state.latest();
    if snapshot.is_none() {
        debug!("No snapshot published yet, serving collector metrics only");
    }

    state
        .metrics
        .render(&state.registry, snapshot.as_deref(), &state.health_stats, start)
        .map_err(|e| {
            error!("Failed to encode Prometheus metrics: {}", e);
            MetricsError::EncodingFailed
        })
}
