//! Authentication module for Gatekeeper
//!
//! Password login with an optional emailed one-time code as second factor.
//! - OTP issuance and single-use verification
//! - HS256 access tokens carried in an HTTP-only cookie
//! - One opaque refresh token per identity, stored hashed

mod clock;
mod cookies;
mod credentials;
mod jwt;
mod notifier;
mod otp;
mod refresh;
mod service;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cookies::{CookieSettings, REFRESH_COOKIE_PATH};
pub use credentials::{
    hash_password, BcryptVerifier, CredentialError, CredentialVerifier, InMemoryUserStore,
    PgUserStore, UserStore,
};
pub use jwt::{decode_secret, Claims, SecretError, TokenError, TokenIssuer, MIN_SECRET_BYTES};
pub use notifier::{LogNotifier, NotifyError, OtpNotifier, RecordingNotifier, SentOtp, SmtpNotifier};
pub use otp::{run_purge_loop, OtpCache, DEFAULT_OTP_TTL_SECONDS};
pub use refresh::{
    InMemoryRefreshTokenStore, IssuedRefreshToken, PgRefreshTokenStore, RefreshError,
    RefreshTokenStore, RefreshTokens,
};
pub use service::{AuthError, AuthMode, AuthService, AuthSettings};
pub use store::StoreError;
