//! Membership events posted by the host platform

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use streamers_core::models::MembershipEvent;

use crate::http::{middleware::WebhookAuth, AppError, AppResult, AppState};

pub fn create_events_router() -> Router<AppState> {
    Router::new().route("/streamers/events", post(receive_event))
}

/// POST /streamers/events
///
/// Queues the event and returns 202; the reconciler applies it in the
/// background.
pub async fn receive_event(
    State(state): State<AppState>,
    _auth: WebhookAuth,
    Json(event): Json<MembershipEvent>,
) -> AppResult<(StatusCode, Json<Value>)> {
    state.events.try_dispatch(event).map_err(|e| {
        warn!(error = %e, "Dropping membership event");
        AppError::service_unavailable("Event queue unavailable")
    })?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}
