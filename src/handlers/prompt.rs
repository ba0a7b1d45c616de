//! Assistant context text built from the latest snapshot.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use herakles_host_telemetry::prompt::{append_question, format_prompt};
use herakles_host_telemetry::snapshot::{MetricSnapshot, ProfilerStatus};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    /// Optional user question appended after the metrics block.
    pub question: Option<String>,
}

#[instrument(skip(state))]
pub async fn prompt_handler(
    State(state): State<SharedState>,
    Query(query): Query<PromptQuery>,
) -> impl IntoResponse {
    debug!("Processing /prompt request");

    // Before the first tick the prompt still renders, with every value marked unsampled.
    let text = match state.latest() {
        Some(snapshot) => format_prompt(&snapshot),
        None => format_prompt(&MetricSnapshot::empty(ProfilerStatus::Initializing)),
    };
    let text = match query.question.as_deref() {
        Some(q) if !q.trim().is_empty() => append_question(&text, q.trim()),
        _ => text,
    };

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        text,
    )
}
