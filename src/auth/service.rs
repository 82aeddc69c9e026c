//! Authentication service
//!
//! Sequences the login protocol: credentials, optional OTP second factor,
//! session issuance, refresh and logout. Storage, delivery and signing are
//! injected at construction.
//!
//! OTP challenges are keyed by username. A successful password check
//! overwrites any pending challenge for that name, so only the most recent
//! signin's code can be redeemed.

use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use super::cookies::CookieSettings;
use super::credentials::{
    hash_password, CredentialError, CredentialVerifier, UserStore, EMAIL_CONSTRAINT,
    USERNAME_CONSTRAINT,
};
use super::jwt::{SecretError, TokenError, TokenIssuer};
use super::notifier::OtpNotifier;
use super::otp::OtpCache;
use super::refresh::{RefreshError, RefreshTokens};
use super::store::StoreError;
use crate::models::{
    NewUser, RefreshedTokens, Role, SessionTokens, SigninOutcome, SignupRequest, User,
    UserInfoResponse,
};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Bad credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Validation(String),

    #[error("Username is already taken!")]
    UsernameTaken,

    #[error("Email is already in use!")]
    EmailTaken,

    #[error("Invalid OTP")]
    OtpInvalid,

    #[error("Refresh Token is empty!")]
    RefreshTokenMissing,

    #[error("Refresh token is not in database!")]
    RefreshNotFound,

    #[error("Refresh token was expired. Please make a new signin request")]
    RefreshExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(TokenError),

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CredentialError> for AuthError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::InvalidCredentials => AuthError::InvalidCredentials,
            CredentialError::Store(e) => AuthError::Store(e),
            CredentialError::Hashing(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<RefreshError> for AuthError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::Expired => AuthError::RefreshExpired,
            RefreshError::Store(e) => AuthError::Store(e),
        }
    }
}

impl From<SecretError> for AuthError {
    fn from(e: SecretError) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl From<ValidationErrors> for AuthError {
    fn from(e: ValidationErrors) -> Self {
        AuthError::Validation(validation_message(&e))
    }
}

/// Whether signin issues tokens directly or goes through an OTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SingleFactor,
    TwoFactor,
}

/// Tunables for [`AuthService`]
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub access_token_ttl: Duration,
    /// Issue a new refresh token on every refresh call
    pub rotate_refresh_tokens: bool,
    pub bcrypt_cost: u32,
    pub cookies: CookieSettings,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn CredentialVerifier>,
    otp: OtpCache,
    tokens: TokenIssuer,
    refresh_tokens: RefreshTokens,
    notifier: Arc<dyn OtpNotifier>,
    settings: AuthSettings,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn CredentialVerifier>,
        otp: OtpCache,
        tokens: TokenIssuer,
        refresh_tokens: RefreshTokens,
        notifier: Arc<dyn OtpNotifier>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            verifier,
            otp,
            tokens,
            refresh_tokens,
            notifier,
            settings,
        }
    }

    /// Register a new identity
    pub async fn signup(&self, req: SignupRequest) -> Result<User, AuthError> {
        req.validate()?;

        if self.users.exists_by_username(&req.username).await? {
            return Err(AuthError::UsernameTaken);
        }
        if self.users.exists_by_email(&req.email).await? {
            return Err(AuthError::EmailTaken);
        }

        let roles = match &req.role {
            None => vec![Role::User],
            Some(names) if names.is_empty() => vec![Role::User],
            Some(names) => names.iter().map(|n| Role::from_signup(n)).collect(),
        };

        let password_hash = hash_password(&req.password, self.settings.bcrypt_cost).await?;

        // Two concurrent signups can both pass the existence checks; the
        // unique constraints decide the winner.
        let user = self
            .users
            .insert(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
                roles,
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(c) if c == USERNAME_CONSTRAINT => AuthError::UsernameTaken,
                StoreError::Duplicate(c) if c == EMAIL_CONSTRAINT => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// First login step
    ///
    /// In two-factor mode this issues and delivers an OTP but creates no
    /// session material. In single-factor mode the session is established
    /// immediately.
    pub async fn signin(&self, username: &str, password: &str) -> Result<SigninOutcome, AuthError> {
        let user = self.verifier.verify(username, password).await.map_err(|e| {
            if matches!(e, CredentialError::InvalidCredentials) {
                tracing::info!(username = %username, "Signin rejected: bad credentials");
            }
            AuthError::from(e)
        })?;

        match self.settings.mode {
            AuthMode::SingleFactor => {
                let session = self.establish_session(user).await?;
                Ok(SigninOutcome::Authenticated(session))
            }
            AuthMode::TwoFactor => {
                let code = self.otp.generate(&user.username).await;
                tracing::info!(user_id = %user.id, "OTP challenge issued");

                // The challenge stays valid even if the email never leaves.
                let ttl_minutes = minutes_rounded_up(self.otp.ttl());
                if let Err(e) = self.notifier.send_otp(&user.email, &code, ttl_minutes).await {
                    tracing::error!(user_id = %user.id, error = %e, "Failed to deliver OTP");
                }

                Ok(SigninOutcome::OtpSent)
            }
        }
    }

    /// Second login step: consume the OTP and establish a session
    pub async fn verify_otp(&self, username: &str, code: &str) -> Result<SessionTokens, AuthError> {
        // Absent, expired and mismatched codes all look the same to the caller.
        if !self.otp.consume(username, code).await {
            tracing::info!(username = %username, "OTP verification failed");
            return Err(AuthError::OtpInvalid);
        }

        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.establish_session(user).await
    }

    /// Mint a new access token from a refresh token
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshedTokens, AuthError> {
        let token = match refresh_token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(AuthError::RefreshTokenMissing),
        };

        let record = self
            .refresh_tokens
            .find_by_token(token)
            .await?
            .ok_or(AuthError::RefreshNotFound)?;
        let record = self.refresh_tokens.verify_expiration(record).await?;

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let access_token = self
            .tokens
            .sign(&user.username, self.settings.access_token_ttl)?;

        let refresh_token = if self.settings.rotate_refresh_tokens {
            Some(self.refresh_tokens.create_for_user(user.id).await?.token)
        } else {
            None
        };

        tracing::debug!(user_id = %user.id, rotated = refresh_token.is_some(), "Access token refreshed");
        Ok(RefreshedTokens {
            access_token,
            refresh_token,
        })
    }

    /// Drop the server-side refresh token, if any
    ///
    /// Never fails: store errors are logged and swallowed so the caller can
    /// always clear the client's cookies.
    pub async fn logout(&self, refresh_token: Option<&str>) {
        let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
            return;
        };

        if let Err(e) = self.refresh_tokens.delete_by_token(token).await {
            tracing::warn!(error = %e, "Failed to delete refresh token on logout");
        }
    }

    /// Resolve an access token to its username
    ///
    /// The specific failure kind is logged; callers should only surface a
    /// generic "invalid token".
    pub fn authenticate(&self, access_token: &str) -> Result<String, AuthError> {
        self.tokens
            .parse(access_token)
            .map(|claims| claims.sub)
            .map_err(|kind| {
                tracing::warn!(kind = ?kind, "Rejected access token");
                AuthError::InvalidToken(kind)
            })
    }

    /// Public summary of the identity named `username`
    pub async fn current_user(&self, username: &str) -> Result<UserInfoResponse, AuthError> {
        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(user.into())
    }

    pub async fn username_available(&self, username: &str) -> Result<bool, AuthError> {
        Ok(!self.users.exists_by_username(username).await?)
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.settings.cookies
    }

    /// Handle to the OTP cache, for the background purge task
    pub fn otp_cache(&self) -> OtpCache {
        self.otp.clone()
    }

    /// Sign an access token and replace the identity's refresh token
    async fn establish_session(&self, user: User) -> Result<SessionTokens, AuthError> {
        let access_token = self
            .tokens
            .sign(&user.username, self.settings.access_token_ttl)?;
        let issued = self.refresh_tokens.create_for_user(user.id).await?;

        tracing::info!(user_id = %user.id, "Session established");
        Ok(SessionTokens {
            access_token,
            refresh_token: issued.token,
            user: user.into(),
        })
    }
}

/// Flatten validator output into "field: message" pairs
fn validation_message(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

/// Whole minutes for the OTP email; a partial minute counts as one
fn minutes_rounded_up(ttl: Duration) -> i64 {
    (ttl.num_seconds() + 59) / 60
}
