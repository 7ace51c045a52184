//! Persisted token model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Scopes, TokenKind};

/// The stored view of an access or refresh token.
///
/// Every token issued from one code exchange, including all refresh rotations
/// that follow, shares one `family_id`. Revoking or detecting reuse acts on
/// the family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Digest of the token value.
    pub token_hash: String,

    /// Access or refresh.
    pub kind: TokenKind,

    /// Owning client.
    pub client_id: String,

    /// Subject the token was issued for.
    pub subject: String,

    /// Granted scopes.
    pub scopes: Scopes,

    /// Rotation family.
    pub family_id: String,

    /// JWT `jti` (access tokens).
    pub jti: Option<String>,

    /// When the subject authenticated.
    pub auth_time: Option<DateTime<Utc>>,

    /// When the token was issued.
    pub issued_at: DateTime<Utc>,

    /// When the token expires.
    pub expires_at: DateTime<Utc>,

    /// Hard stop for the refresh rotation chain (refresh tokens).
    pub chain_expires_at: Option<DateTime<Utc>>,

    /// Set once a refresh token has been rotated.
    pub used: bool,

    /// Set on explicit or cascaded revocation.
    pub revoked: bool,
}

impl TokenRecord {
    /// Checks if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns whether the token is currently usable.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.used && !self.is_expired_at(now)
    }

    /// Returns whether this is a refresh token.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.kind == TokenKind::Refresh
    }
}
