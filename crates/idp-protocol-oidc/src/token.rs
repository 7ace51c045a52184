//! Token signing and token endpoint response shapes.
//!
//! Access tokens and ID tokens are ES384 JWTs signed by one snapshot of the
//! current key, so every token in a [`TokenSet`] shares a `kid`.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use idp_core::ProviderConfig;
use idp_crypto::{SignatureAlgorithm, SignatureError};
use idp_model::{Scopes, TokenKind, TokenRecord};
use serde::{Deserialize, Serialize};

use crate::claims::{AccessTokenClaims, IdTokenClaims};
use crate::error::OidcResult;
use crate::keys::{KeyManager, SigningKeyEntry};

/// JWS `typ` for access tokens (RFC 9068).
pub const ACCESS_TOKEN_TYPE: &str = "at+jwt";

/// JWS `typ` for ID tokens.
pub const ID_TOKEN_TYPE: &str = "JWT";

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    /// Compact JWS.
    pub token: String,
    /// Signed claims.
    pub claims: AccessTokenClaims,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// Signs access and ID tokens.
#[derive(Debug)]
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    issuer: String,
    access_lifespan: Duration,
    id_lifespan: Duration,
    algorithm: SignatureAlgorithm,
}

impl TokenIssuer {
    /// Creates an issuer from provider configuration.
    #[must_use]
    pub fn new(config: &ProviderConfig, keys: Arc<KeyManager>) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            access_lifespan: config.access_token_duration(),
            id_lifespan: config.id_token_duration(),
            algorithm: config.signature_algorithm,
        }
    }

    /// The `iss` value stamped on every token.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub const fn access_lifespan(&self) -> Duration {
        self.access_lifespan
    }

    /// Returns a snapshot of the current signing key.
    #[must_use]
    pub fn signer(&self) -> Arc<SigningKeyEntry> {
        self.keys.current_signing_key()
    }

    /// Signs an access token valid from `now` for the configured lifespan.
    ///
    /// # Errors
    ///
    /// Fails only if the signer rejects the claims.
    pub fn issue_access_token(
        &self,
        signer: &SigningKeyEntry,
        subject: &str,
        client_id: &str,
        scopes: &Scopes,
        auth_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> OidcResult<IssuedAccessToken> {
        let expires_at = now + self.access_lifespan;
        let claims = AccessTokenClaims::new(&self.issuer, subject, client_id, now, expires_at)
            .with_scope(scopes.to_string())
            .with_auth_time(auth_time);

        let token = signer.sign(ACCESS_TOKEN_TYPE, &claims)?;
        Ok(IssuedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Signs an ID token bound to `access_token` through `at_hash`.
    ///
    /// # Errors
    ///
    /// Fails only if the signer rejects the claims.
    #[allow(clippy::too_many_arguments)]
    pub fn issue_id_token(
        &self,
        signer: &SigningKeyEntry,
        subject: &str,
        client_id: &str,
        nonce: Option<&str>,
        auth_time: Option<DateTime<Utc>>,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> OidcResult<String> {
        let claims = IdTokenClaims::new(&self.issuer, subject, client_id, now, now + self.id_lifespan)
            .with_nonce(nonce)
            .with_auth_time(auth_time)
            .with_at_hash(self.compute_at_hash(access_token));

        Ok(signer.sign(ID_TOKEN_TYPE, &claims)?)
    }

    /// Verifies an access token signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Verification`] on any failure.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, SignatureError> {
        let mut validation = self.keys.validation();
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        self.keys.verify(token, &validation)
    }

    /// Verifies an ID token for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Verification`] on any failure.
    pub fn verify_id_token(&self, token: &str, client_id: &str) -> Result<IdTokenClaims, SignatureError> {
        let mut validation = self.keys.validation();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        self.keys.verify(token, &validation)
    }

    /// Left half of the access token digest, base64url encoded.
    fn compute_at_hash(&self, access_token: &str) -> String {
        let hash = idp_crypto::hash::hash(self.algorithm.hash_algorithm(), access_token.as_bytes());
        URL_SAFE_NO_PAD.encode(&hash[..hash.len() / 2])
    }
}

/// Successful token endpoint body (RFC 6749 section 5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Signed `at+jwt`.
    pub access_token: String,
    /// `Bearer`.
    pub token_type: String,
    /// Seconds until `access_token` expires.
    pub expires_in: i64,
    /// Opaque rotation credential; present only for `offline_access` grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Present when `openid` was granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Scopes actually granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// RFC 7662 introspection body.
///
/// Inactive tokens serialize as `{"active":false}` with no other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently usable.
    pub active: bool,
    /// Granted scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Owning client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// `Bearer` or `refresh_token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issue time, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// End-user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Provider issuer URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Access token `jti`; refresh tokens have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    /// Creates an inactive introspection response.
    #[must_use]
    pub const fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            token_type: None,
            exp: None,
            iat: None,
            sub: None,
            iss: None,
            jti: None,
        }
    }

    /// Creates an active response from a verified access token.
    #[must_use]
    pub fn from_access_token(claims: &AccessTokenClaims) -> Self {
        Self {
            active: true,
            scope: Some(claims.scope.clone()),
            client_id: Some(claims.client_id.clone()),
            token_type: Some("Bearer".to_string()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            sub: Some(claims.sub.clone()),
            iss: Some(claims.iss.clone()),
            jti: Some(claims.jti.clone()),
        }
    }

    /// Creates an active response from a stored refresh token.
    #[must_use]
    pub fn from_refresh_record(record: &TokenRecord, issuer: &str) -> Self {
        Self {
            active: true,
            scope: Some(record.scopes.to_string()),
            client_id: Some(record.client_id.clone()),
            token_type: Some(TokenKind::Refresh.hint().to_string()),
            exp: Some(record.expires_at.timestamp()),
            iat: Some(record.issued_at.timestamp()),
            sub: Some(record.subject.clone()),
            iss: Some(issuer.to_string()),
            jti: None,
        }
    }
}
