// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    /// Machine-readable code for rejected input
    pub code: Option<&'static str>,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
            code: self.code.map(str::to_string),
        });

        (status, body).into_response()
    }
}

/// Convert streamers_core errors to HTTP errors
impl From<streamers_core::Error> for AppError {
    fn from(err: streamers_core::Error) -> Self {
        use streamers_core::Error;

        let code = err.code();
        match err {
            Error::Validation(e) => Self::unprocessable(e.to_string()).with_code(code),
            Error::NotFound(msg) => Self::not_found(msg).with_code(code),
            Error::AlreadyExists(msg) => Self::conflict(msg).with_code(code),
            Error::InvalidInput(msg) => Self::bad_request(msg).with_code(code),
            Error::Authorization(msg) => Self::forbidden(msg).with_code(code),
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::internal_server_error("Database error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal_server_error("Data processing error")
            }
            Error::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamers_core::validation::ValidationError;

    #[test]
    fn test_validation_maps_to_422_with_code() {
        let err = AppError::from(streamers_core::Error::from(ValidationError::TagNotAllowed));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, Some("tag_not_allowed"));
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = AppError::from(streamers_core::Error::Internal("pool exhausted".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_authorization_maps_to_403() {
        let err = AppError::from(streamers_core::Error::Authorization("nope".to_string()));
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, Some("not_allowed"));
    }
}
