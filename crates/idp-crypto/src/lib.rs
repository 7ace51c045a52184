//! # idp-crypto
//!
//! Cryptographic primitives for the identity provider core, built on aws-lc-rs.
//!
//! ## CNSA 2.0 Posture
//!
//! - Token signatures use ECDSA P-384 with SHA-384 (ES384)
//! - At-rest digests of codes, tokens and client secrets use SHA-384
//! - SHA-256 is available only because RFC 7636 (PKCE `S256`) mandates it
//!
//! ## Modules
//!
//! - [`algorithm`] - Signature algorithm identifiers
//! - [`hash`] - Digests and constant-time comparison
//! - [`keys`] - ECDSA signing key generation and loading
//! - [`random`] - CSPRNG helpers for codes, tokens and secrets
//! - [`signature`] - Error type for key operations

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod algorithm;
pub mod hash;
pub mod keys;
pub mod random;
pub mod signature;

pub use algorithm::{AlgorithmError, EllipticCurve, HashAlgorithm, SignatureAlgorithm};
pub use hash::{constant_time_eq, digest_b64url, sha256, sha384, sha512};
pub use keys::EcdsaSigningKey;
pub use signature::SignatureError;
