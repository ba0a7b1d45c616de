//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "Project: https://github.com/herakles-io/herakles-host-telemetry | Support: proc-mem@herakles.io";

/// Handler for the /health endpoint.
///
/// 503 until the first snapshot has been published.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let (status, message) = match state.latest() {
        Some(snapshot) => (
            StatusCode::OK,
            format!(
                "OK - snapshot #{} at {} (profiler: {})",
                snapshot.sequence,
                snapshot.timestamp.to_rfc3339(),
                snapshot.profiler_status
            ),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Waiting for first sample".to_string(),
        ),
    };

    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{FOOTER_TEXT}"),
    )
}
