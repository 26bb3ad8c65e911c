//! Live status endpoints

use axum::{extract::State, routing::get, Json, Router};

use streamers_core::cache::{StatusPayload, StreamsPayload};

use crate::http::{middleware::MaybeAuthUser, AppError, AppResult, AppState};

pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route("/streams.json", get(list_streams))
        .route("/streams/status.json", get(streams_status))
}

fn enforce_login_requirement(state: &AppState, user: MaybeAuthUser) -> AppResult<()> {
    if state.settings.current().streams_page_requires_login && user.0.is_none() {
        return Err(AppError::forbidden("Login required"));
    }
    Ok(())
}

/// GET /streams.json
pub async fn list_streams(
    State(state): State<AppState>,
    user: MaybeAuthUser,
) -> AppResult<Json<StreamsPayload>> {
    enforce_login_requirement(&state, user)?;
    let settings = state.settings.current();
    Ok(Json(state.live_status.streams_payload(&settings).await))
}

/// GET /streams/status.json
///
/// Lightweight variant for UI indicators
pub async fn streams_status(
    State(state): State<AppState>,
    user: MaybeAuthUser,
) -> AppResult<Json<StatusPayload>> {
    enforce_login_requirement(&state, user)?;
    let settings = state.settings.current();
    Ok(Json(state.live_status.status_payload(&settings).await))
}
