//! Storage-backed OIDC provider.
//!
//! [`Provider`] wires the registry, both engines and the key manager to one
//! store, one configuration and one event listener.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idp_core::ProviderConfig;
//! use idp_protocol_oidc::Provider;
//! use idp_storage_sql::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::open_path("idp.db")?);
//! let provider = Provider::new(ProviderConfig::from_env()?, store)?;
//!
//! let registered = provider.registry().register(&metadata)?;
//! let metadata = provider.discovery();
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idp_core::event::{EventBuilder, TracingEventListener};
use idp_core::{EventListener, EventType, ProviderConfig};
use idp_crypto::SignatureError;
use idp_storage::{StorageResult, Store};

use crate::authorization::AuthorizationEngine;
use crate::discovery::ProviderMetadata;
use crate::error::ProviderError;
use crate::jwks::JsonWebKeySet;
use crate::keys::{KeyManager, SigningKeyEntry};
use crate::registry::ClientRegistry;
use crate::token::TokenIssuer;
use crate::token_engine::TokenEngine;

/// Counts removed by [`Provider::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Expired authorization codes removed.
    pub codes: u64,
    /// Expired token records removed.
    pub tokens: u64,
    /// Retired signing keys dropped from the key set.
    pub keys: usize,
}

/// An OIDC provider over one store.
pub struct Provider<S: Store + ?Sized> {
    config: Arc<ProviderConfig>,
    keys: Arc<KeyManager>,
    events: Arc<dyn EventListener>,
    registry: ClientRegistry<S>,
    authorization: AuthorizationEngine<S>,
    tokens: TokenEngine<S>,
    store: Arc<S>,
}

impl<S: Store + ?Sized> Provider<S> {
    /// Creates a provider with a freshly generated signing key, logging
    /// security events through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or key generation fails.
    pub fn new(config: ProviderConfig, store: Arc<S>) -> Result<Self, ProviderError> {
        Self::with_listener(config, store, Arc::new(TracingEventListener::new()))
    }

    /// Creates a provider with a freshly generated signing key and a custom
    /// event listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or key generation fails.
    pub fn with_listener(
        config: ProviderConfig,
        store: Arc<S>,
        events: Arc<dyn EventListener>,
    ) -> Result<Self, ProviderError> {
        config.validate()?;
        let keys = Arc::new(KeyManager::generate(
            config.signature_algorithm,
            config.key_rotation_grace_duration(),
        )?);
        Self::with_parts(config, store, keys, events)
    }

    /// Creates a provider from pre-built parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_parts(
        config: ProviderConfig,
        store: Arc<S>,
        keys: Arc<KeyManager>,
        events: Arc<dyn EventListener>,
    ) -> Result<Self, ProviderError> {
        config.validate()?;
        let config = Arc::new(config);
        let issuer = Arc::new(TokenIssuer::new(&config, keys.clone()));

        tracing::info!(
            issuer = %config.issuer,
            kid = keys.current_signing_key().kid(),
            cascade = config.revocation_cascade.as_str(),
            "provider initialized"
        );

        Ok(Self {
            registry: ClientRegistry::new(store.clone(), config.clone(), events.clone()),
            authorization: AuthorizationEngine::new(store.clone(), config.clone(), events.clone()),
            tokens: TokenEngine::new(store.clone(), config.clone(), issuer, events.clone()),
            config,
            keys,
            events,
            store,
        })
    }

    /// Returns the client registry.
    #[must_use]
    pub const fn registry(&self) -> &ClientRegistry<S> {
        &self.registry
    }

    /// Returns the authorization engine.
    #[must_use]
    pub const fn authorization(&self) -> &AuthorizationEngine<S> {
        &self.authorization
    }

    /// Returns the token engine.
    #[must_use]
    pub const fn tokens(&self) -> &TokenEngine<S> {
        &self.tokens
    }

    /// Returns the key manager.
    #[must_use]
    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns the discovery document.
    #[must_use]
    pub fn discovery(&self) -> ProviderMetadata {
        ProviderMetadata::from_config(&self.config)
    }

    /// Returns the published verification keys.
    #[must_use]
    pub fn jwks(&self) -> JsonWebKeySet {
        self.keys.public_key_set()
    }

    /// Rotates the signing key. The previous key stays published for the
    /// configured grace period.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails; the current key is unchanged.
    pub fn rotate_keys(&self) -> Result<Arc<SigningKeyEntry>, SignatureError> {
        let previous = self.keys.current_signing_key();
        let current = self.keys.rotate()?;

        tracing::info!(previous = previous.kid(), current = current.kid(), "signing key rotated");
        self.events.on_event(
            &EventBuilder::new(EventType::KeyRotated)
                .detail("previous_kid", previous.kid())
                .detail("kid", current.kid())
                .build(),
        );
        Ok(current)
    }

    /// Removes expired codes, expired tokens and retired keys.
    ///
    /// # Errors
    ///
    /// Returns a storage error; nothing is retried.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<PurgeReport> {
        let report = PurgeReport {
            codes: self.store.purge_expired_codes(now)?,
            tokens: self.store.purge_expired_tokens(now)?,
            keys: self.keys.prune_retired(now),
        };
        tracing::debug!(
            codes = report.codes,
            tokens = report.tokens,
            keys = report.keys,
            "purged expired entries"
        );
        Ok(report)
    }
}
