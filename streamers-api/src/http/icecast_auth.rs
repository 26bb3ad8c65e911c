//! Source authentication callback for the streaming server
//!
//! Icecast posts its `stream_auth` parameters as an urlencoded form; some
//! setups put them in the query string instead. Both are read, the body wins
//! field by field.

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use streamers_core::service::SourceAuthRequest;

use crate::http::{middleware::ClientInfo, AppState};

/// Set on every response so operators can tell the outcome from proxy logs
pub const OUTCOME_HEADER: &str = "x-streamers-icecastauth";
/// Icecast accepts the source when this is `1`
pub const ICECAST_AUTH_HEADER: &str = "icecast-auth-user";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthParams {
    mount: Option<String>,
    user: Option<String>,
    username: Option<String>,
    pass: Option<String>,
    password: Option<String>,
    client: Option<String>,
    ip: Option<String>,
    agent: Option<String>,
}

impl AuthParams {
    fn parse(raw: &[u8]) -> Self {
        serde_urlencoded::from_bytes(raw).unwrap_or_default()
    }

    /// Field-wise merge, `self` first
    fn or(self, other: Self) -> Self {
        Self {
            mount: present(self.mount).or(other.mount),
            user: present(self.user).or(other.user),
            username: present(self.username).or(other.username),
            pass: present(self.pass).or(other.pass),
            password: present(self.password).or(other.password),
            client: present(self.client).or(other.client),
            ip: present(self.ip).or(other.ip),
            agent: present(self.agent).or(other.agent),
        }
    }

    fn into_request(self, client: ClientInfo) -> SourceAuthRequest {
        SourceAuthRequest {
            mount: self.mount.unwrap_or_default(),
            user: present(self.user).or(self.username).unwrap_or_default(),
            key: present(self.pass).or(self.password).unwrap_or_default(),
            client: self.client,
            remote: client.remote,
            user_agent: present(self.agent).or(client.user_agent),
            source_ip: present(self.ip),
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn create_icecast_auth_router() -> Router<AppState> {
    Router::new().route("/streamers/icecast/auth", post(authenticate_source))
}

/// POST /streamers/icecast/auth
pub async fn authenticate_source(
    State(state): State<AppState>,
    client: ClientInfo,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let query = AuthParams::parse(query.as_deref().unwrap_or_default().as_bytes());
    let form = AuthParams::parse(&body);
    let request = form.or(query).into_request(client);

    let settings = state.settings.current();
    let decision = state.source_auth.authenticate(&settings, &request).await;

    if decision.is_allowed() {
        (
            StatusCode::OK,
            [
                (HeaderName::from_static(ICECAST_AUTH_HEADER), HeaderValue::from_static("1")),
                (HeaderName::from_static(OUTCOME_HEADER), HeaderValue::from_static("ok")),
            ],
            "OK",
        )
            .into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            [(HeaderName::from_static(OUTCOME_HEADER), HeaderValue::from_static("deny"))],
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}
