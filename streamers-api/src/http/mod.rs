// Module: http
// JSON/REST endpoints for the streaming server, the host platform and end users

pub mod admin;
pub mod error;
pub mod events;
pub mod health;
pub mod icecast_auth;
pub mod middleware;
pub mod streams;
pub mod user_settings;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use streamers_core::{
    cache::LiveStatusCache,
    service::{EventDispatcher, SettingsHandle, SourceAuthService, UserSettingsService},
};

pub use error::{AppError, AppResult};
pub use middleware::AuthKeys;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: SettingsHandle,
    pub source_auth: SourceAuthService,
    pub user_settings: UserSettingsService,
    pub live_status: LiveStatusCache,
    pub events: EventDispatcher,
    pub auth: Arc<AuthKeys>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint (for monitoring probes)
        .merge(health::create_health_router())
        // Called by the streaming server when a source connects
        .merge(icecast_auth::create_icecast_auth_router())
        // Public live status
        .merge(streams::create_streams_router())
        // Authenticated end user
        .merge(user_settings::create_user_settings_router())
        // Host platform (webhook secret)
        .merge(events::create_events_router())
        .merge(admin::create_admin_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
