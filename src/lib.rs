//! Gatekeeper auth service library
//!
//! Password login with an emailed one-time code, cookie-borne access tokens
//! and server-side refresh tokens, exposed as an axum router.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use auth::{
    AuthService, AuthSettings, BcryptVerifier, Clock, OtpCache, OtpNotifier, RefreshTokenStore,
    RefreshTokens, SecretError, TokenIssuer, UserStore,
};
use config::Config;

/// Wire an [`AuthService`] from configuration and the chosen backends
pub fn build_auth_service(
    config: &Config,
    users: Arc<dyn UserStore>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    notifier: Arc<dyn OtpNotifier>,
    clock: Arc<dyn Clock>,
) -> Result<AuthService, SecretError> {
    let tokens = TokenIssuer::from_base64_secret(&config.jwt_secret, clock.clone())?;
    let otp = OtpCache::new(clock.clone(), config.otp_ttl());
    let refresh_tokens = RefreshTokens::new(refresh_store, clock, config.refresh_token_ttl());
    let verifier = Arc::new(BcryptVerifier::new(users.clone()));

    Ok(AuthService::new(
        users,
        verifier,
        otp,
        tokens,
        refresh_tokens,
        notifier,
        AuthSettings {
            mode: config.auth_mode,
            access_token_ttl: config.access_token_ttl(),
            rotate_refresh_tokens: config.refresh_token_rotation,
            bcrypt_cost: config.bcrypt_cost,
            cookies: config.cookie_settings(),
        },
    ))
}
