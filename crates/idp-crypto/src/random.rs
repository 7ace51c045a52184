//! Random credentials: codes, refresh tokens and client secrets.
//!
//! Everything here draws from the thread-local CSPRNG.

use rand::Rng;
use rand::distr::{Alphanumeric, SampleString};

/// Returns `len` random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a random string of `len` alphanumeric characters (a-z, A-Z, 0-9).
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    Alphanumeric.sample_string(&mut rng, len)
}

/// Generates a URL-safe base64-encoded random string from `byte_len` bytes.
#[must_use]
pub fn random_base64url(byte_len: usize) -> String {
    let bytes = random_bytes(byte_len);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Generates a secure random authorization code.
///
/// # Security
///
/// 32 alphanumeric characters carry approximately 190 bits of entropy
/// (log2(62^32)), above the 128-bit floor for authorization codes.
#[must_use]
pub fn generate_auth_code() -> String {
    random_alphanumeric(32)
}

/// Generates an opaque refresh token (256 random bits, base64url).
#[must_use]
pub fn generate_refresh_token() -> String {
    random_base64url(32)
}

/// Generates a public client identifier.
#[must_use]
pub fn generate_client_id() -> String {
    random_alphanumeric(22)
}

/// Generates a client secret or registration access token.
///
/// # Security
///
/// 256 random bits, base64url encoded.
#[must_use]
pub fn generate_client_secret() -> String {
    random_base64url(32)
}
