//! Authorization code model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CodeChallengeMethod, Scopes};

/// A stored authorization code.
///
/// The code value itself is never stored; `code_hash` is its SHA-384 digest.
/// A code moves from issued to consumed exactly once, and the exchange that
/// consumes it records the token family it produced in `family_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Digest of the code value.
    pub code_hash: String,

    /// Client ID that requested the code.
    pub client_id: String,

    /// Redirect URI used in the request.
    pub redirect_uri: String,

    /// Granted scopes.
    pub scopes: Scopes,

    /// Authenticated subject.
    pub subject: String,

    /// Nonce from the authorization request.
    pub nonce: Option<String>,

    /// PKCE code challenge.
    pub code_challenge: Option<String>,

    /// PKCE code challenge method.
    pub code_challenge_method: Option<CodeChallengeMethod>,

    /// When the subject authenticated.
    pub auth_time: Option<DateTime<Utc>>,

    /// When the code was issued.
    pub issued_at: DateTime<Utc>,

    /// When the code expires.
    pub expires_at: DateTime<Utc>,

    /// Whether the code has been exchanged.
    pub consumed: bool,

    /// Token family created by the exchange, once consumed.
    pub family_id: Option<String>,
}

impl AuthorizationCode {
    /// Checks if the code has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checks if the code has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
