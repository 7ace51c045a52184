//! Hash functions and constant-time comparison.
//!
//! ## CNSA 2.0 Compliance
//!
//! SHA-384 is the default digest. [`sha256`] exists only for PKCE `S256`,
//! whose challenge derivation is fixed by RFC 7636.

use aws_lc_rs::digest;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use subtle::ConstantTimeEq;

use crate::algorithm::HashAlgorithm;

/// Computes a hash of the input data.
#[must_use]
pub fn hash(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let alg = match algorithm {
        HashAlgorithm::Sha256 => &digest::SHA256,
        HashAlgorithm::Sha384 => &digest::SHA384,
        HashAlgorithm::Sha512 => &digest::SHA512,
    };

    digest::digest(alg, data).as_ref().to_vec()
}

/// Computes a SHA-256 hash of the input data.
///
/// Reserved for protocol-mandated uses (PKCE `S256`).
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    hash(HashAlgorithm::Sha256, data)
}

/// Computes a SHA-384 hash of the input data.
#[must_use]
pub fn sha384(data: &[u8]) -> Vec<u8> {
    hash(HashAlgorithm::Sha384, data)
}

/// Computes a SHA-512 hash of the input data.
#[must_use]
pub fn sha512(data: &[u8]) -> Vec<u8> {
    hash(HashAlgorithm::Sha512, data)
}

/// SHA-384 digest of a secret value, base64url encoded without padding.
///
/// Authorization codes, tokens and client secrets are persisted only in
/// this form; lookups digest the presented value first.
#[must_use]
pub fn digest_b64url(secret: &str) -> String {
    URL_SAFE_NO_PAD.encode(sha384(secret.as_bytes()))
}

/// Compares two byte strings in constant time.
///
/// Inputs of different length compare unequal without early exit on content.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}
