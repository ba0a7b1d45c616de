//! JSON view of the latest snapshot.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{debug, instrument};

use crate::state::SharedState;

#[instrument(skip(state))]
pub async fn snapshot_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /snapshot request");
    match state.latest() {
        Some(snapshot) => Json(&*snapshot).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No snapshot published yet").into_response(),
    }
}
