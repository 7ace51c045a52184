//! JSON Web Key Set (JWKS) types.
//!
//! Implements JWKS as defined in:
//! - [RFC 7517](https://tools.ietf.org/html/rfc7517) (JSON Web Key)
//! - [RFC 7518](https://tools.ietf.org/html/rfc7518) (JSON Web Algorithms)
//!
//! Only public EC signing keys are ever published.

use idp_crypto::{EllipticCurve, SignatureAlgorithm};
use serde::{Deserialize, Serialize};

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Array of JSON Web Keys.
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Creates a JWKS with the given keys.
    #[must_use]
    pub const fn with_keys(keys: Vec<JsonWebKey>) -> Self {
        Self { keys }
    }

    /// Finds a key by its ID.
    #[must_use]
    pub fn find_key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Returns the published key IDs in order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.kid.as_str())
    }
}

/// Public JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type.
    pub kty: KeyType,

    /// Public key use. Always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,

    /// Algorithm intended for use with the key.
    pub alg: String,

    /// Key ID.
    pub kid: String,

    /// EC curve name.
    pub crv: EcCurve,

    /// EC x coordinate (base64url encoded).
    pub x: String,

    /// EC y coordinate (base64url encoded).
    pub y: String,
}

impl JsonWebKey {
    /// Creates an EC public signing key from base64url coordinates.
    #[must_use]
    pub fn ec_public(
        kid: impl Into<String>,
        algorithm: SignatureAlgorithm,
        x: impl Into<String>,
        y: impl Into<String>,
    ) -> Self {
        Self {
            kty: KeyType::Ec,
            key_use: "sig".to_string(),
            alg: algorithm.jwa_name().to_string(),
            kid: kid.into(),
            crv: EcCurve::from(algorithm.curve()),
            x: x.into(),
            y: y.into(),
        }
    }
}

/// Key type for JWK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Elliptic Curve key.
    #[serde(rename = "EC")]
    Ec,
}

/// Elliptic curve names for JWK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    /// NIST P-384 curve (CNSA 2.0 compliant).
    #[serde(rename = "P-384")]
    P384,
}

impl EcCurve {
    /// Returns the curve name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P384 => "P-384",
        }
    }
}

impl From<EllipticCurve> for EcCurve {
    fn from(curve: EllipticCurve) -> Self {
        match curve {
            EllipticCurve::P384 => Self::P384,
        }
    }
}
