//! Authentication support for the sync server.
//!
//! This module provides bearer-token authentication using HMAC-SHA256.
//! Tokens include the issue time for expiration checking.
//!
//! ## Token Format
//!
//! `<payload>.<signature>`, both base64url without padding, where the
//! payload is `<user id>:<issued at, Unix millis>` and the signature is the
//! HMAC-SHA256 of the raw payload bytes.

use crate::config::DEFAULT_TOKEN_EXPIRY;
use crate::error::{ServerError, ServerResult};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tidesync_core::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `user_id`, issued now.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if the user ID is empty or
    /// contains `:`.
    pub fn create_token(&self, user_id: &str) -> ServerResult<String> {
        self.create_token_at(user_id, Timestamp::now())
    }

    /// Creates a token for `user_id` with an explicit issue time.
    ///
    /// # Errors
    ///
    /// Same as [`TokenValidator::create_token`].
    pub fn create_token_at(&self, user_id: &str, issued_at: Timestamp) -> ServerResult<String> {
        if user_id.is_empty() || user_id.contains(':') {
            return Err(ServerError::InvalidRequest(format!(
                "invalid user id {user_id:?}"
            )));
        }
        let payload = format!("{user_id}:{}", issued_at.as_millis());
        let signature = self.sign(payload.as_bytes())?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Validates a token and returns its user ID.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuthenticationFailed`] if the token is
    /// malformed, carries a bad signature, or has expired.
    pub fn validate(&self, token: &str) -> ServerResult<String> {
        self.validate_at(token, Timestamp::now())
    }

    /// Validates a token against an explicit current time.
    ///
    /// # Errors
    ///
    /// Same as [`TokenValidator::validate`].
    pub fn validate_at(&self, token: &str, now: Timestamp) -> ServerResult<String> {
        let malformed = || ServerError::AuthenticationFailed("malformed token".into());

        let (payload, signature) = token.split_once('.').ok_or_else(malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| malformed())?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let payload = String::from_utf8(payload).map_err(|_| malformed())?;
        let (user_id, issued_at) = payload.rsplit_once(':').ok_or_else(malformed)?;
        let issued_at: i64 = issued_at.parse().map_err(|_| malformed())?;

        let expiry_millis = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        if now.as_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        Ok(user_id.to_string())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// # Errors
///
/// Returns [`ServerError::AuthenticationFailed`] if the header is missing,
/// uses another scheme, or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> ServerResult<&str> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ServerError::AuthenticationFailed("missing Authorization header".into()))?
        .to_str()
        .map_err(|_| ServerError::AuthenticationFailed("Authorization header is not UTF-8".into()))?;

    let (scheme, token) = header.split_once(' ').ok_or_else(|| {
        ServerError::AuthenticationFailed("Authorization header must be `Bearer <token>`".into())
    })?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ServerError::AuthenticationFailed(
            "Authorization scheme must be `Bearer`".into(),
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ServerError::AuthenticationFailed("bearer token is empty".into()));
    }
    Ok(token)
}
