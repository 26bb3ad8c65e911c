// HTTP request authentication

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use streamers_core::{config::AuthConfig, models::UserId};

use super::{AppError, AppState};

/// Verification material for the two kinds of bearer credentials
pub struct AuthKeys {
    /// `None` when no JWT secret is configured; every user token is rejected
    decoding_key: Option<DecodingKey>,
    webhook_secret: String,
}

impl std::fmt::Debug for AuthKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKeys")
            .field("jwt", &self.decoding_key.is_some())
            .field("webhook", &!self.webhook_secret.is_empty())
            .finish()
    }
}

/// Claims the host platform puts in end-user tokens
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Platform user id
    pub sub: String,
    pub exp: i64,
}

impl AuthKeys {
    #[must_use]
    pub fn new(jwt_secret: &str, webhook_secret: &str) -> Self {
        Self {
            decoding_key: (!jwt_secret.is_empty())
                .then(|| DecodingKey::from_secret(jwt_secret.as_bytes())),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, &config.webhook_secret)
    }

    /// Verify an HS256 user token and return its subject
    pub fn verify_user_token(&self, token: &str) -> Result<UserId, AppError> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("User tokens are not accepted"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 60; // clock skew with the host

        let data = decode::<Claims>(token, key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::unauthorized("Token expired")
                }
                _ => AppError::unauthorized("Invalid token"),
            }
        })?;

        UserId::parse(&data.claims.sub)
            .ok_or_else(|| AppError::unauthorized("Invalid token subject"))
    }

    /// Compare a presented webhook secret in constant time
    #[must_use]
    pub fn verify_webhook_secret(&self, presented: &str) -> bool {
        !self.webhook_secret.is_empty()
            && bool::from(presented.as_bytes().ct_eq(self.webhook_secret.as_bytes()))
    }
}

/// Token from an `Authorization: Bearer ...` header
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticated end user extracted from a bearer JWT
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let user_id = app_state.auth.verify_user_token(token)?;
        Ok(Self { user_id })
    }
}

/// End user if a valid bearer token was presented, otherwise anonymous
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<UserId>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        Ok(Self(
            bearer_token(parts).and_then(|token| app_state.auth.verify_user_token(token).ok()),
        ))
    }
}

/// The host platform, authenticated by the shared webhook secret
#[derive(Debug, Clone, Copy)]
pub struct WebhookAuth;

impl<S> FromRequestParts<S> for WebhookAuth
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        if app_state.auth.verify_webhook_secret(token) {
            Ok(Self)
        } else {
            Err(AppError::unauthorized("Invalid webhook secret"))
        }
    }
}

/// Caller address and agent, for logging only
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub remote: Option<String>,
    pub user_agent: Option<String>,
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        // First hop of X-Forwarded-For, then the socket peer
        let forwarded = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self {
            remote: forwarded.or(peer),
            user_agent: header_str(header::USER_AGENT.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_secret_comparison() {
        let keys = AuthKeys::new("", "s3cret");
        assert!(keys.verify_webhook_secret("s3cret"));
        assert!(!keys.verify_webhook_secret("s3cret "));
        assert!(!keys.verify_webhook_secret(""));

        // An unset secret never matches, not even an empty presentation
        let keys = AuthKeys::new("", "");
        assert!(!keys.verify_webhook_secret(""));
    }

    #[test]
    fn test_user_tokens_rejected_without_secret() {
        let keys = AuthKeys::new("", "s3cret");
        let err = keys.verify_user_token("a.b.c").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let (mut parts, ()) = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "bearer  abc ")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc"));

        parts
            .headers
            .insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&parts), None);
    }
}
