//! Claim sets carried by signed tokens.
//!
//! Access tokens follow the RFC 9068 profile; ID tokens follow `OpenID`
//! Connect Core section 2. Times are seconds since the Unix epoch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of an `at+jwt` access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Provider issuer URL.
    pub iss: String,
    /// End-user the grant belongs to.
    pub sub: String,
    /// Expiry.
    pub exp: i64,
    /// Signing time.
    pub iat: i64,
    /// Per-token UUIDv7, never reused.
    pub jti: String,
    /// Client the token was issued to.
    pub client_id: String,
    /// Granted scopes, space separated.
    pub scope: String,
    /// When the end-user authenticated, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
}

impl AccessTokenClaims {
    /// Creates new access token claims issued at `now`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        client_id: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            client_id: client_id.into(),
            scope: String::new(),
            auth_time: None,
        }
    }

    /// Replaces the granted scope string.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub fn with_auth_time(mut self, auth_time: Option<DateTime<Utc>>) -> Self {
        self.auth_time = auth_time.map(|t| t.timestamp());
        self
    }
}

/// Payload of an ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Provider issuer URL.
    pub iss: String,
    /// End-user identifier.
    pub sub: String,
    /// Always the requesting client.
    pub aud: String,
    /// Expiry.
    pub exp: i64,
    /// Signing time.
    pub iat: i64,
    /// When the end-user authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// Echo of the `nonce` sent with the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Client the token was issued to; equal to `aud`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Left half of the access token digest, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
}

impl IdTokenClaims {
    /// Creates new ID token claims issued at `now`.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        client_id: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let client_id = client_id.into();
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: client_id.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            auth_time: None,
            nonce: None,
            azp: Some(client_id),
            at_hash: None,
        }
    }

    /// Copies the request nonce, if any.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<&str>) -> Self {
        self.nonce = nonce.map(ToString::to_string);
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub fn with_auth_time(mut self, auth_time: Option<DateTime<Utc>>) -> Self {
        self.auth_time = auth_time.map(|t| t.timestamp());
        self
    }

    /// Binds the ID token to its access token.
    #[must_use]
    pub fn with_at_hash(mut self, at_hash: impl Into<String>) -> Self {
        self.at_hash = Some(at_hash.into());
        self
    }
}
