//! Authentication HTTP handlers
//!
//! Endpoints for password + OTP login and cookie-based sessions.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::CookieJar;
use validator::Validate;

use super::AuthenticatedUser;
use crate::error::{ApiError, ErrorResponse};
use crate::models::{
    MessageResponse, SessionTokens, SigninOutcome, SigninRequest, SignupRequest, UserInfoResponse,
    UsernameAvailability, UsernameQuery, VerifyOtpRequest,
};
use crate::state::AppState;

/// Attach both session cookies to `jar`
fn with_session_cookies(state: &AppState, jar: CookieJar, session: &SessionTokens) -> CookieJar {
    let cookies = state.auth_service.cookies();
    jar.add(cookies.access_cookie(session.access_token.clone()))
        .add(cookies.refresh_cookie(session.refresh_token.clone()))
}

/// POST /api/auth/signin - Check credentials; send an OTP or open a session
pub async fn signin(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<SigninRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    req.validate()?;

    match state.auth_service.signin(&req.username, &req.password).await? {
        SigninOutcome::OtpSent => Ok(Json(MessageResponse::new(
            "OTP has been sent to your email for verification.",
        ))
        .into_response()),
        SigninOutcome::Authenticated(session) => {
            let jar = with_session_cookies(&state, jar, &session);
            Ok((jar, Json(session.user)).into_response())
        }
    }
}

/// POST /api/auth/verify-otp - Redeem the OTP and set session cookies
pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<UserInfoResponse>), ApiError> {
    let Json(req) = payload?;
    req.validate()?;

    let session = state.auth_service.verify_otp(&req.username, &req.otp).await?;
    let jar = with_session_cookies(&state, jar, &session);

    Ok((jar, Json(session.user)))
}

/// POST /api/auth/signup - Register a new account
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = payload?;
    state.auth_service.signup(req).await?;

    Ok(Json(MessageResponse::new("User registered successfully!")))
}

/// POST /api/auth/signout - Drop the refresh token and clear both cookies
///
/// Always succeeds; a failed delete is logged by the service.
pub async fn signout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    let cookies = state.auth_service.cookies();
    // Browsers only send the refresh cookie to its own path, so this is
    // usually None; the cookie path stays scoped to the refresh endpoint.
    let refresh_token = jar.get(&cookies.refresh_name).map(|c| c.value().to_string());

    state.auth_service.logout(refresh_token.as_deref()).await;

    let jar = jar
        .add(cookies.clear_access_cookie())
        .add(cookies.clear_refresh_cookie());
    (jar, Json(MessageResponse::new("You've been signed out!")))
}

/// POST /api/auth/refreshtoken - New access cookie from the refresh cookie
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let cookies = state.auth_service.cookies();
    let presented = jar.get(&cookies.refresh_name).map(|c| c.value().to_string());

    let refreshed = state.auth_service.refresh(presented.as_deref()).await?;

    let mut jar = jar.add(cookies.access_cookie(refreshed.access_token));
    if let Some(rotated) = refreshed.refresh_token {
        jar = jar.add(cookies.refresh_cookie(rotated));
    }

    Ok((jar, Json(MessageResponse::new("Token refreshed successfully!"))))
}

/// GET /api/auth/me - Summary of the authenticated identity
pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserInfoResponse>, ApiError> {
    let info = state.auth_service.current_user(&user.username).await?;
    Ok(Json(info))
}

/// GET /api/auth/checkUsername?username= - Whether a username is free
pub async fn check_username(
    State(state): State<AppState>,
    query: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;

    match state.auth_service.username_available(&query.username).await {
        Ok(available) => Ok(Json(UsernameAvailability { available }).into_response()),
        Err(e) => {
            tracing::error!(error = %e, "Username availability check failed");
            let body = ErrorResponse {
                code: "INTERNAL_ERROR".to_string(),
                message: "Server error while checking username".to_string(),
            };
            Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
        }
    }
}
