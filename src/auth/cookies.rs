//! Cookie framing for access and refresh tokens
//!
//! The access cookie is sent on every request under `/`. The refresh cookie
//! is scoped to the refresh endpoint so it never rides along on ordinary
//! API calls.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Duration;

/// Path the refresh cookie is restricted to
pub const REFRESH_COOKIE_PATH: &str = "/api/auth/refreshtoken";

/// Names, lifetimes and flags for the two auth cookies
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub access_name: String,
    pub refresh_name: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Set the `Secure` attribute (production deployments)
    pub secure: bool,
}

impl CookieSettings {
    pub fn access_cookie(&self, token: String) -> Cookie<'static> {
        self.build(self.access_name.clone(), token, "/", self.access_ttl)
    }

    pub fn refresh_cookie(&self, token: String) -> Cookie<'static> {
        self.build(
            self.refresh_name.clone(),
            token,
            REFRESH_COOKIE_PATH,
            self.refresh_ttl,
        )
    }

    /// Empty access cookie with zero max-age so the client drops it
    pub fn clear_access_cookie(&self) -> Cookie<'static> {
        self.build(self.access_name.clone(), String::new(), "/", Duration::zero())
    }

    pub fn clear_refresh_cookie(&self) -> Cookie<'static> {
        self.build(
            self.refresh_name.clone(),
            String::new(),
            REFRESH_COOKIE_PATH,
            Duration::zero(),
        )
    }

    fn build(
        &self,
        name: String,
        value: String,
        path: &'static str,
        ttl: Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path(path)
            .max_age(time::Duration::seconds(ttl.num_seconds()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}
