//! Authentication extractors
//!
//! The access token normally travels in the HTTP-only access cookie. An
//! `Authorization: Bearer` header is accepted when the cookie is absent.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    extract::CookieJar,
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;

use crate::auth::AuthService;
use crate::error::ApiError;

/// Caller identified by a valid access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
}

async fn access_token<S>(parts: &mut Parts, state: &S, cookie_name: &str) -> Option<String>
where
    S: Send + Sync,
{
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(cookie_name) {
        return Some(cookie.value().to_string());
    }

    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);

        let token = access_token(parts, state, &auth_service.cookies().access_name)
            .await
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;

        let username = auth_service.authenticate(&token)?;

        Ok(AuthenticatedUser { username })
    }
}
