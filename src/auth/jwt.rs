//! Access token signing and parsing
//!
//! Access tokens are HS256 JWTs carrying only the username, issue time and
//! expiry. They are never persisted; a token is valid exactly when its
//! signature checks out and the clock has not reached its expiry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use jsonwebtoken::{
    crypto, decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::clock::Clock;

/// Shortest HMAC key accepted for HS256
pub const MIN_SECRET_BYTES: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Reasons a presented token is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Unsupported token scheme")]
    UnsupportedScheme,

    #[error("Token signature does not match")]
    BadSignature,
}

/// Signing secret problems detected at startup
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("JWT secret is not valid base64: {0}")]
    NotBase64(#[from] base64::DecodeError),

    #[error("JWT secret must decode to at least {MIN_SECRET_BYTES} bytes, got {0}")]
    TooShort(usize),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Decode the base64 configuration value into raw HMAC key bytes
pub fn decode_secret(encoded: &str) -> Result<Vec<u8>, SecretError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    if bytes.len() < MIN_SECRET_BYTES {
        return Err(SecretError::TooShort(bytes.len()));
    }
    Ok(bytes)
}

/// Signs and verifies access tokens with a single symmetric key
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Build an issuer from already-decoded key bytes
    pub fn new(key: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            clock,
        }
    }

    /// Build an issuer from the base64-encoded secret
    pub fn from_base64_secret(encoded: &str, clock: Arc<dyn Clock>) -> Result<Self, SecretError> {
        let key = decode_secret(encoded)?;
        Ok(Self::new(&key, clock))
    }

    /// Sign a token for `subject` that expires `ttl` from now
    pub fn sign(&self, subject: &str, ttl: Duration) -> Result<String, SecretError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| SecretError::Encoding(e.to_string()))
    }

    /// Verify signature and expiry and return the claims
    ///
    /// The signature is checked over the raw segments before anything inside
    /// them is interpreted, so any altered byte surfaces as `BadSignature`.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (header, payload, signature) =
            match (segments.next(), segments.next(), segments.next(), segments.next()) {
                (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => (h, p, s),
                _ => return Err(TokenError::Malformed),
            };

        // Unsecured ("alg": "none") tokens carry an empty signature segment.
        if signature.is_empty() {
            return Err(TokenError::UnsupportedScheme);
        }

        let message = &token[..header.len() + 1 + payload.len()];
        match crypto::verify(signature, message.as_bytes(), &self.decoding_key, ALGORITHM) {
            Ok(true) => {}
            Ok(false) => return Err(TokenError::BadSignature),
            Err(_) => return Err(TokenError::Malformed),
        }

        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedScheme);
        }

        let mut validation = Validation::new(ALGORITHM);
        // Expiry is judged against our own clock below.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| map_decode_error(e.kind()))?
            .claims;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Boolean form of `parse`; the failure kind goes to the log only
    pub fn validate(&self, token: &str) -> bool {
        match self.parse(token) {
            Ok(_) => true,
            Err(kind) => {
                tracing::warn!(kind = ?kind, "Rejected access token");
                false
            }
        }
    }
}

fn map_decode_error(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => TokenError::UnsupportedScheme,
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;

    const SECRET_B64: &str = "dGVzdC1zZWNyZXQta2V5LXRoYXQtaXMtbG9uZy1lbm91Z2gtZm9yLWhzMjU2";

    fn issuer() -> (TokenIssuer, ManualClock) {
        let clock = ManualClock::default();
        let issuer = TokenIssuer::from_base64_secret(SECRET_B64, Arc::new(clock.clone())).unwrap();
        (issuer, clock)
    }

    #[test]
    fn test_sign_then_parse() {
        let (issuer, _) = issuer();

        let token = issuer.sign("alice", Duration::seconds(900)).unwrap();
        let claims = issuer.parse(&token).unwrap();

        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(issuer.validate(&token));
    }

    #[test]
    fn test_expiry_boundary() {
        let (issuer, clock) = issuer();
        let token = issuer.sign("alice", Duration::seconds(900)).unwrap();

        clock.advance(Duration::seconds(899));
        assert!(issuer.parse(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(issuer.parse(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_tampered_payload_is_bad_signature() {
        let (issuer, _) = issuer();
        let token = issuer.sign("alice", Duration::seconds(900)).unwrap();

        let dot = token.find('.').unwrap();
        let mut bytes = token.into_bytes();
        let i = dot + 3;
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(issuer.parse(&tampered), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_tampered_header_and_signature_are_bad_signature() {
        let (issuer, _) = issuer();
        let token = issuer.sign("alice", Duration::seconds(900)).unwrap();

        let mut header_changed = token.clone().into_bytes();
        header_changed[1] = if header_changed[1] == b'x' { b'y' } else { b'x' };
        let header_changed = String::from_utf8(header_changed).unwrap();
        assert_eq!(issuer.parse(&header_changed), Err(TokenError::BadSignature));

        let mut sig_changed = token.into_bytes();
        let last = sig_changed.len() - 2;
        sig_changed[last] = if sig_changed[last] == b'A' { b'B' } else { b'A' };
        let sig_changed = String::from_utf8(sig_changed).unwrap();
        assert_eq!(issuer.parse(&sig_changed), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_wrong_key_is_bad_signature() {
        let (issuer, clock) = issuer();
        let other = TokenIssuer::new(&[7u8; 32], Arc::new(clock));

        let token = other.sign("alice", Duration::seconds(900)).unwrap();
        assert_eq!(issuer.parse(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_malformed_and_unsigned_tokens() {
        let (issuer, _) = issuer();

        assert_eq!(issuer.parse(""), Err(TokenError::Malformed));
        assert_eq!(issuer.parse("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(issuer.parse("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(
            issuer.parse("eyJhbGciOiJub25lIn0.eyJzdWIiOiJhbGljZSJ9."),
            Err(TokenError::UnsupportedScheme)
        );
        assert!(!issuer.validate("garbage"));
    }

    #[test]
    fn test_decode_secret_rejects_bad_input() {
        assert!(matches!(
            decode_secret("%%%not base64%%%"),
            Err(SecretError::NotBase64(_))
        ));
        assert!(matches!(
            decode_secret("c2hvcnQ="),
            Err(SecretError::TooShort(5))
        ));
        assert_eq!(decode_secret(SECRET_B64).unwrap().len(), 45);
    }
}
