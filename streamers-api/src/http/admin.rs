//! Administrative endpoints for the host platform

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use streamers_core::models::UserId;

use crate::http::{middleware::WebhookAuth, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct AssignMountRequest {
    pub mount: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignMountResponse {
    pub user_id: UserId,
    pub mount: String,
    pub enabled: bool,
}

pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        .route("/streamers/admin/users/{user_id}/mount", put(assign_mount))
        .route(
            "/streamers/admin/users/{user_id}/stream_key",
            delete(revoke_stream_key),
        )
}

/// PUT /streamers/admin/users/{user_id}/mount
pub async fn assign_mount(
    State(state): State<AppState>,
    _auth: WebhookAuth,
    Path(user_id): Path<i64>,
    Json(req): Json<AssignMountRequest>,
) -> AppResult<Json<AssignMountResponse>> {
    let setting = state
        .user_settings
        .assign_mount(UserId(user_id), &req.mount)
        .await?;

    // The live listing joins on mounts
    state.live_status.invalidate_all();

    Ok(Json(AssignMountResponse {
        user_id: setting.user_id,
        mount: setting.public_mount(),
        enabled: setting.enabled,
    }))
}

/// DELETE /streamers/admin/users/{user_id}/stream_key
pub async fn revoke_stream_key(
    State(state): State<AppState>,
    _auth: WebhookAuth,
    Path(user_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.user_settings.revoke_key(UserId(user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
