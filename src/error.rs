//! HTTP error envelope shared by every route.
//!
//! DESIGN
//! ======
//! Services return their own `thiserror` enums. Each enum implements
//! `ErrorCode` so the failure has a stable, grepable `E_*` code; the route
//! layer picks the HTTP status and converts into `ApiError`, which renders
//! as `{"code": "...", "message": "..."}`.
//!
//! ERROR HANDLING
//! ==============
//! Database failures are logged with full detail and rendered as a generic
//! `internal error` so SQL never reaches the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Stable machine-readable code for an error.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    /// Wrap a service error, hiding the message of server-side failures.
    #[must_use]
    pub fn from_error(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Self {
        if status.is_server_error() {
            tracing::error!(code = err.error_code(), error = %err, "request failed");
            return Self::new(status, err.error_code(), "internal error");
        }
        Self::new(status, err.error_code(), err.to_string())
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", "authentication required")
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "E_FORBIDDEN", "insufficient role")
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "E_BAD_REQUEST", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "E_DATABASE", "internal error")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("class is full")]
    struct Full;

    impl ErrorCode for Full {
        fn error_code(&self) -> &'static str {
            "E_CLASS_FULL"
        }
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::from_error(StatusCode::CONFLICT, &Full);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "E_CLASS_FULL");
        assert_eq!(err.message, "class is full");
    }

    #[test]
    fn server_errors_hide_their_message() {
        let err = ApiError::from_error(StatusCode::INTERNAL_SERVER_ERROR, &Full);
        assert_eq!(err.code, "E_CLASS_FULL");
        assert_eq!(err.message, "internal error");
    }

    #[test]
    fn body_omits_status() {
        let json = serde_json::to_value(ApiError::forbidden()).unwrap();
        assert_eq!(json, serde_json::json!({ "code": "E_FORBIDDEN", "message": "insufficient role" }));
    }
}
