//! Self-service stream settings for the authenticated user

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use streamers_core::service::StreamSettingsView;

use crate::http::{middleware::AuthUser, AppResult, AppState};

/// Returned once, right after rotation
#[derive(Debug, Serialize, Deserialize)]
pub struct RotateKeyResponse {
    pub stream_key: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StreamTagRequest {
    #[serde(default)]
    pub stream_tag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamTagResponse {
    pub stream_tag: Option<String>,
}

pub fn create_user_settings_router() -> Router<AppState> {
    Router::new()
        .route("/streamers/me.json", get(show_settings))
        .route("/streamers/me/rotate_key", post(rotate_key))
        .route("/streamers/me/stream_tag", post(update_stream_tag))
}

/// GET /streamers/me.json
pub async fn show_settings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<StreamSettingsView>> {
    let settings = state.settings.current();
    let view = state.user_settings.show(&settings, auth.user_id).await?;
    Ok(Json(view))
}

/// POST /streamers/me/rotate_key
pub async fn rotate_key(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<RotateKeyResponse>> {
    let settings = state.settings.current();
    let key = state.user_settings.rotate_key(&settings, auth.user_id).await?;
    Ok(Json(RotateKeyResponse {
        stream_key: key.into_inner(),
    }))
}

/// POST /streamers/me/stream_tag
pub async fn update_stream_tag(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<StreamTagRequest>,
) -> AppResult<Json<StreamTagResponse>> {
    let settings = state.settings.current();
    let stream_tag = state
        .user_settings
        .update_stream_tag(&settings, auth.user_id, req.stream_tag.as_deref())
        .await?;
    Ok(Json(StreamTagResponse { stream_tag }))
}
