//! Proof Key for Code Exchange (RFC 7636).
//!
//! Pure functions only. Matching fails closed: a malformed verifier never
//! matches, whatever the stored challenge.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use idp_crypto::{constant_time_eq, sha256};
use idp_model::CodeChallengeMethod;

/// Minimum verifier and challenge length.
pub const MIN_LEN: usize = 43;

/// Maximum verifier and challenge length.
pub const MAX_LEN: usize = 128;

/// PKCE verifier for the authorization code flow.
pub struct PkceVerifier;

impl PkceVerifier {
    /// Returns whether `value` has a legal verifier or challenge shape:
    /// 43 to 128 characters from the unreserved set.
    #[must_use]
    pub fn is_well_formed(value: &str) -> bool {
        (MIN_LEN..=MAX_LEN).contains(&value.len())
            && value
                .bytes()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~'))
    }

    /// Derives the challenge for `verifier` under `method`.
    ///
    /// `S256` is `base64url(SHA-256(verifier))` without padding; `plain` is
    /// the verifier itself.
    #[must_use]
    pub fn derive_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
        match method {
            CodeChallengeMethod::Plain => verifier.to_string(),
            CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(sha256(verifier.as_bytes())),
        }
    }

    /// Checks `verifier` against a stored challenge in constant time.
    #[must_use]
    pub fn matches(challenge: &str, method: CodeChallengeMethod, verifier: &str) -> bool {
        if !Self::is_well_formed(verifier) {
            return false;
        }
        let computed = Self::derive_challenge(verifier, method);
        constant_time_eq(computed.as_bytes(), challenge.as_bytes())
    }
}
