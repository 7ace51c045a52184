//! Cryptographic algorithm definitions.
//!
//! ## CNSA 2.0 Compliance
//!
//! Signing keys are ECDSA P-384 (ES384). SHA-256 based JWS algorithms
//! (ES256, RS256, PS256, HS256) are rejected when parsed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for algorithm operations.
#[derive(Debug, Error)]
pub enum AlgorithmError {
    /// Algorithm is not CNSA 2.0 compliant.
    #[error("algorithm '{0}' is not CNSA 2.0 compliant")]
    NotCnsaCompliant(String),

    /// Unknown algorithm.
    #[error("unknown algorithm: {0}")]
    Unknown(String),
}

/// Digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256. Only used where a protocol mandates it (PKCE `S256`).
    #[serde(rename = "SHA256")]
    Sha256,

    /// SHA-384 (CNSA 2.0 minimum).
    #[serde(rename = "SHA384")]
    Sha384,

    /// SHA-512.
    #[serde(rename = "SHA512")]
    Sha512,
}

/// Token signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA using P-384 curve and SHA-384 hash.
    #[default]
    #[serde(rename = "ES384")]
    Es384,
}

impl SignatureAlgorithm {
    /// Returns the JWA algorithm name.
    #[must_use]
    pub const fn jwa_name(self) -> &'static str {
        match self {
            Self::Es384 => "ES384",
        }
    }

    /// Returns the hash algorithm used by this signature algorithm.
    #[must_use]
    pub const fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::Es384 => HashAlgorithm::Sha384,
        }
    }

    /// Returns the curve backing this algorithm.
    #[must_use]
    pub const fn curve(self) -> EllipticCurve {
        match self {
            Self::Es384 => EllipticCurve::P384,
        }
    }

    /// Parses a JWA algorithm name.
    ///
    /// ## Errors
    ///
    /// Returns an error if the algorithm is not CNSA 2.0 compliant or unknown.
    pub fn from_jwa(name: &str) -> Result<Self, AlgorithmError> {
        match name {
            "ES384" => Ok(Self::Es384),
            "ES256" | "RS256" | "PS256" | "HS256" => {
                Err(AlgorithmError::NotCnsaCompliant(name.to_string()))
            }
            _ => Err(AlgorithmError::Unknown(name.to_string())),
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.jwa_name())
    }
}

/// Elliptic curves available for signing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EllipticCurve {
    /// NIST P-384 curve (secp384r1).
    #[serde(rename = "P-384")]
    P384,
}

impl EllipticCurve {
    /// Returns the JWK curve name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::P384 => "P-384",
        }
    }

    /// Returns the coordinate size in bytes.
    #[must_use]
    pub const fn coordinate_len(self) -> usize {
        match self {
            Self::P384 => 48,
        }
    }
}
