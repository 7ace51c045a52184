//! Signing key ring.
//!
//! One key is current and signs every new token. On rotation the previous
//! current key moves to a retiring list with a deadline of `now + grace`; it
//! stays published and verifiable until then. The grace period must be at
//! least the longest token lifetime, so no unexpired token ever loses its key.
//!
//! Issuance takes one `Arc` snapshot of the current key, so a signature never
//! spans a rotation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use idp_crypto::{EcdsaSigningKey, SignatureAlgorithm, SignatureError};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::jwks::{JsonWebKey, JsonWebKeySet};

/// Maps a signature algorithm to its `jsonwebtoken` counterpart.
const fn jwt_algorithm(algorithm: SignatureAlgorithm) -> Algorithm {
    match algorithm {
        SignatureAlgorithm::Es384 => Algorithm::ES384,
    }
}

/// A signing key with its derived JWS keys and published JWK.
pub struct SigningKeyEntry {
    key: EcdsaSigningKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: JsonWebKey,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for SigningKeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyEntry")
            .field("kid", &self.kid())
            .field("algorithm", &self.algorithm())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKeyEntry {
    /// Wraps a key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the public point cannot be exported.
    pub fn new(key: EcdsaSigningKey, created_at: DateTime<Utc>) -> Result<Self, SignatureError> {
        let (x, y) = key.public_coordinates()?;
        let decoding_key = DecodingKey::from_ec_components(&x, &y)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_der(key.pkcs8_der());
        let jwk = JsonWebKey::ec_public(key.key_id(), key.algorithm(), x, y);

        Ok(Self {
            key,
            encoding_key,
            decoding_key,
            jwk,
            created_at,
        })
    }

    /// Returns the key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.key.key_id()
    }

    /// Returns the signature algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.key.algorithm()
    }

    /// Returns the public JWK.
    #[must_use]
    pub const fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    /// Returns when the key was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Signs `claims` as a compact JWS with this key's `kid` in the header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails.
    pub fn sign<T: Serialize>(&self, typ: &str, claims: &T) -> Result<String, SignatureError> {
        let mut header = Header::new(jwt_algorithm(self.algorithm()));
        header.kid = Some(self.kid().to_string());
        header.typ = Some(typ.to_string());

        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| SignatureError::Signing(e.to_string()))
    }
}

/// Publication state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Current signer.
    Active,
    /// Replaced, but still published and verifiable until the deadline.
    Retiring {
        /// End of the grace period.
        until: DateTime<Utc>,
    },
}

struct RetiringKey {
    entry: Arc<SigningKeyEntry>,
    until: DateTime<Utc>,
}

struct KeyRing {
    current: Arc<SigningKeyEntry>,
    retiring: Vec<RetiringKey>,
}

impl KeyRing {
    fn find(&self, kid: &str, now: DateTime<Utc>) -> Option<(Arc<SigningKeyEntry>, KeyState)> {
        if self.current.kid() == kid {
            return Some((Arc::clone(&self.current), KeyState::Active));
        }
        self.retiring
            .iter()
            .find(|r| r.entry.kid() == kid && r.until > now)
            .map(|r| (Arc::clone(&r.entry), KeyState::Retiring { until: r.until }))
    }
}

/// Owner of the signing key ring.
pub struct KeyManager {
    algorithm: SignatureAlgorithm,
    grace: Duration,
    ring: RwLock<KeyRing>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("KeyManager")
            .field("algorithm", &self.algorithm)
            .field("grace", &self.grace)
            .field("current", &ring.current.kid())
            .field("retiring", &ring.retiring.len())
            .finish()
    }
}

impl KeyManager {
    /// Creates a key manager with a freshly generated current key.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SignatureAlgorithm, grace: Duration) -> Result<Self, SignatureError> {
        let key = EcdsaSigningKey::generate(algorithm)?;
        Self::from_key(key, grace)
    }

    /// Creates a key manager around an existing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be exported.
    pub fn from_key(key: EcdsaSigningKey, grace: Duration) -> Result<Self, SignatureError> {
        let algorithm = key.algorithm();
        let current = Arc::new(SigningKeyEntry::new(key, Utc::now())?);
        Ok(Self {
            algorithm,
            grace,
            ring: RwLock::new(KeyRing {
                current,
                retiring: Vec::new(),
            }),
        })
    }

    /// Returns the grace period granted to replaced keys.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Returns a snapshot of the current signing key.
    #[must_use]
    pub fn current_signing_key(&self) -> Arc<SigningKeyEntry> {
        Arc::clone(&self.ring.read().current)
    }

    /// Generates a new current key; the previous one starts its grace period.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails. The ring is unchanged then.
    pub fn rotate(&self) -> Result<Arc<SigningKeyEntry>, SignatureError> {
        self.rotate_at(Utc::now())
    }

    /// [`rotate`](Self::rotate) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Result<Arc<SigningKeyEntry>, SignatureError> {
        let key = EcdsaSigningKey::generate(self.algorithm)?;
        self.install_at(key, now)
    }

    /// Makes `key` the current signer; the previous one starts its grace period.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be exported or uses another algorithm.
    pub fn install_at(
        &self,
        key: EcdsaSigningKey,
        now: DateTime<Utc>,
    ) -> Result<Arc<SigningKeyEntry>, SignatureError> {
        if key.algorithm() != self.algorithm {
            return Err(SignatureError::UnsupportedAlgorithm(
                key.algorithm().jwa_name().to_string(),
            ));
        }
        let entry = Arc::new(SigningKeyEntry::new(key, now)?);

        let mut ring = self.ring.write();
        ring.retiring.retain(|r| r.until > now);
        let previous = std::mem::replace(&mut ring.current, Arc::clone(&entry));
        ring.retiring.push(RetiringKey {
            entry: previous,
            until: now + self.grace,
        });

        tracing::info!(kid = %entry.kid(), retiring = ring.retiring.len(), "signing key rotated");
        Ok(entry)
    }

    /// Drops retiring keys whose grace period has elapsed. Returns how many.
    pub fn prune_retired(&self, now: DateTime<Utc>) -> usize {
        let mut ring = self.ring.write();
        let before = ring.retiring.len();
        ring.retiring.retain(|r| r.until > now);
        before - ring.retiring.len()
    }

    /// Returns the state of `kid`, or `None` if it is unknown or retired.
    #[must_use]
    pub fn key_state(&self, kid: &str, now: DateTime<Utc>) -> Option<KeyState> {
        self.ring.read().find(kid, now).map(|(_, state)| state)
    }

    /// Returns the published verification keys: the current key and every key
    /// still inside its grace period.
    #[must_use]
    pub fn public_key_set(&self) -> JsonWebKeySet {
        self.public_key_set_at(Utc::now())
    }

    /// [`public_key_set`](Self::public_key_set) with an explicit clock.
    #[must_use]
    pub fn public_key_set_at(&self, now: DateTime<Utc>) -> JsonWebKeySet {
        let ring = self.ring.read();
        let keys = std::iter::once(&ring.current)
            .chain(ring.retiring.iter().filter(|r| r.until > now).map(|r| &r.entry))
            .map(|entry| entry.jwk().clone())
            .collect();
        JsonWebKeySet::with_keys(keys)
    }

    /// Signs `claims` with the current key.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign<T: Serialize>(&self, typ: &str, claims: &T) -> Result<String, SignatureError> {
        self.current_signing_key().sign(typ, claims)
    }

    /// Returns a validation template for this ring's algorithm.
    #[must_use]
    pub fn validation(&self) -> Validation {
        let mut validation = Validation::new(jwt_algorithm(self.algorithm));
        validation.leeway = 0;
        validation
    }

    /// Verifies a compact JWS against the published key named by its `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Verification`] if the key is unknown or
    /// retired, or if the signature or claims do not validate.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<T, SignatureError> {
        self.verify_at(token, validation, Utc::now())
    }

    /// [`verify`](Self::verify) with an explicit clock for key retirement.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_at<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
        now: DateTime<Utc>,
    ) -> Result<T, SignatureError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| SignatureError::Verification)?;
        let kid = header.kid.ok_or(SignatureError::Verification)?;

        let Some((entry, _)) = self.ring.read().find(&kid, now) else {
            tracing::debug!(%kid, "token signed by unknown or retired key");
            return Err(SignatureError::Verification);
        };

        jsonwebtoken::decode::<T>(token, &entry.decoding_key, validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(%kid, error = %e, "token verification failed");
                SignatureError::Verification
            })
    }
}
