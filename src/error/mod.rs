//! Centralized API error handling for Gatekeeper
//!
//! This module provides a unified error type for API responses with proper
//! HTTP status code mapping and JSON error responses.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
///
/// Kept flat so clients can read `message` directly.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn is_server_error(&self) -> bool {
        matches!(self, ApiError::InternalError(_) | ApiError::DatabaseError(_))
    }

    /// Message safe to show the client; server-side detail stays in the log
    pub fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::ValidationError(m) => m.clone(),
            ApiError::TooManyRequests => "Too many requests".to_string(),
            ApiError::InternalError(_) | ApiError::DatabaseError(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Log server errors
        if self.is_server_error() {
            tracing::error!(error = %self, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            code: error_code.to_string(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => ApiError::ValidationError(msg),
            AuthError::UsernameTaken
            | AuthError::EmailTaken
            | AuthError::OtpInvalid
            | AuthError::RefreshTokenMissing => ApiError::BadRequest(err.to_string()),
            AuthError::InvalidCredentials
            | AuthError::RefreshNotFound
            | AuthError::RefreshExpired
            | AuthError::UserNotFound => ApiError::Unauthorized(err.to_string()),
            // The failure kind was already logged where the token was parsed.
            AuthError::InvalidToken(_) => ApiError::Unauthorized("Unauthorized".to_string()),
            AuthError::Store(e) => ApiError::DatabaseError(e.to_string()),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::from(AuthError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StoreError, TokenError};

    #[test]
    fn test_auth_error_mapping() {
        let cases = [
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED, "Bad credentials"),
            (AuthError::UsernameTaken, StatusCode::BAD_REQUEST, "Username is already taken!"),
            (AuthError::EmailTaken, StatusCode::BAD_REQUEST, "Email is already in use!"),
            (AuthError::OtpInvalid, StatusCode::BAD_REQUEST, "Invalid OTP"),
            (
                AuthError::RefreshTokenMissing,
                StatusCode::BAD_REQUEST,
                "Refresh Token is empty!",
            ),
        ];

        for (auth_err, status, message) in cases {
            let api_err = ApiError::from(auth_err);
            assert_eq!(api_err.status_code(), status);
            assert_eq!(api_err.public_message(), message);
        }
    }

    #[test]
    fn test_token_detail_not_exposed() {
        let api_err = ApiError::from(AuthError::InvalidToken(TokenError::BadSignature));
        assert_eq!(api_err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!api_err.public_message().contains("signature"));

        assert_eq!(
            ApiError::from(AuthError::RefreshExpired).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_server_errors_are_generic() {
        let api_err = ApiError::from(AuthError::Store(StoreError::Database(
            "connection reset by peer".to_string(),
        )));
        assert_eq!(api_err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_err.error_code(), "DATABASE_ERROR");
        assert_eq!(api_err.public_message(), "Internal server error");
    }

    #[test]
    fn test_error_codes_and_statuses() {
        let cases = [
            (ApiError::BadRequest("x".into()), "BAD_REQUEST", StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized("x".into()), "UNAUTHORIZED", StatusCode::UNAUTHORIZED),
            (ApiError::TooManyRequests, "TOO_MANY_REQUESTS", StatusCode::TOO_MANY_REQUESTS),
            (
                ApiError::InternalError("x".into()),
                "INTERNAL_ERROR",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::ValidationError("x".into()),
                "VALIDATION_ERROR",
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.error_code(), code);
            assert_eq!(err.status_code(), status);
        }
    }
}
