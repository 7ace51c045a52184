//! ECDSA signing key generation and loading.
//!
//! Keys are P-384 (ES384) only. Signing of JWS payloads is delegated to the
//! token layer, which consumes [`EcdsaSigningKey::pkcs8_der`] and the public
//! coordinates exposed here.

use aws_lc_rs::{
    rand::SystemRandom,
    signature::{ECDSA_P384_SHA384_FIXED_SIGNING, EcdsaKeyPair, KeyPair},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::algorithm::{EllipticCurve, SignatureAlgorithm};
use crate::signature::SignatureError;

/// ECDSA key pair for token signing.
pub struct EcdsaSigningKey {
    key_pair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
    key_id: String,
    algorithm: SignatureAlgorithm,
}

impl EcdsaSigningKey {
    /// Generates a fresh key pair for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG or key generation fails.
    pub fn generate(algorithm: SignatureAlgorithm) -> Result<Self, SignatureError> {
        let signing_alg = match algorithm {
            SignatureAlgorithm::Es384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        };

        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(signing_alg, &rng)
            .map_err(|e| SignatureError::KeyGeneration(format!("ECDSA key generation failed: {e}")))?;

        Self::from_pkcs8(document.as_ref(), algorithm)
    }

    /// Creates a signing key from a PKCS#8 DER-encoded private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not parse for `algorithm`.
    pub fn from_pkcs8(pkcs8_der: &[u8], algorithm: SignatureAlgorithm) -> Result<Self, SignatureError> {
        let signing_alg = match algorithm {
            SignatureAlgorithm::Es384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
        };

        let key_pair = EcdsaKeyPair::from_pkcs8(signing_alg, pkcs8_der)
            .map_err(|e| SignatureError::InvalidKey(format!("Invalid ECDSA PKCS#8 key: {e}")))?;

        let key_id = generate_key_id(key_pair.public_key().as_ref());

        Ok(Self {
            key_pair,
            pkcs8: pkcs8_der.to_vec(),
            key_id,
            algorithm,
        })
    }

    /// Returns the key ID.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the signature algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Returns the curve of this key.
    #[must_use]
    pub const fn curve(&self) -> EllipticCurve {
        self.algorithm.curve()
    }

    /// Returns the PKCS#8 DER encoding of the private key.
    #[must_use]
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Returns the base64url encoded affine coordinates `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the public point is not in uncompressed form.
    pub fn public_coordinates(&self) -> Result<(String, String), SignatureError> {
        let (x, y) = extract_ec_components(self.key_pair.public_key().as_ref(), self.curve())?;
        Ok((URL_SAFE_NO_PAD.encode(x), URL_SAFE_NO_PAD.encode(y)))
    }
}

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaSigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Generates a key ID from the public key bytes.
fn generate_key_id(public_key: &[u8]) -> String {
    let hash = crate::sha256(public_key);
    URL_SAFE_NO_PAD.encode(&hash[..8])
}

/// Splits an uncompressed EC point (`0x04 || x || y`) into its coordinates.
fn extract_ec_components(point: &[u8], curve: EllipticCurve) -> Result<(&[u8], &[u8]), SignatureError> {
    let coord = curve.coordinate_len();

    if point.len() != 1 + coord * 2 || point[0] != 0x04 {
        return Err(SignatureError::InvalidKey(
            "EC public key is not an uncompressed point".to_string(),
        ));
    }

    Ok((&point[1..=coord], &point[1 + coord..]))
}
