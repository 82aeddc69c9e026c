//! Request/response DTOs for the auth endpoints

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Credentials for the first login step
#[derive(Debug, Deserialize, Validate)]
pub struct SigninRequest {
    #[validate(length(min = 1, message = "username must not be blank"))]
    pub username: String,
    #[validate(length(min = 1, message = "password must not be blank"))]
    pub password: String,
}

/// Second login step: the emailed code
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 1, message = "username must not be blank"))]
    pub username: String,
    #[validate(length(min = 1, message = "otp must not be blank"))]
    pub otp: String,
}

/// Account registration
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 20, message = "username must be 3-20 characters"))]
    pub username: String,
    #[validate(
        email(message = "email must be a valid address"),
        length(max = 50, message = "email must be at most 50 characters")
    )]
    pub email: String,
    #[validate(length(min = 6, max = 40, message = "password must be 6-40 characters"))]
    pub password: String,
    #[serde(default, alias = "roles")]
    pub role: Option<Vec<String>>,
}

/// Query string for the username availability check
#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameAvailability {
    pub available: bool,
}

/// Plain message body used by most auth endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Public identity summary
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserInfoResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
}

/// Outcome of the first login step
#[derive(Debug)]
pub enum SigninOutcome {
    /// Two-factor mode: a code was issued, no session yet
    OtpSent,
    /// Single-factor mode: session established immediately
    Authenticated(SessionTokens),
}

/// Token material for a freshly established session
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserInfoResponse,
}

/// Result of a refresh call
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present only when rotation is enabled
    pub refresh_token: Option<String>,
}
