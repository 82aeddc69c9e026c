//! Authentication routes

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::middleware::{rate_limit, RateLimiter};
use crate::state::AppState;

/// Create authentication routes under `/api/auth`
///
/// The credential-bearing endpoints share one rate limiter.
pub fn auth_routes(limiter: RateLimiter) -> Router<AppState> {
    let limited = Router::new()
        .route("/api/auth/signin", post(auth::signin))
        .route("/api/auth/verify-otp", post(auth::verify_otp))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/refreshtoken", post(auth::refresh_token))
        .route_layer(from_fn_with_state(limiter, rate_limit));

    Router::new()
        .merge(limited)
        .route("/api/auth/signout", post(auth::signout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/checkUsername", get(auth::check_username))
}
