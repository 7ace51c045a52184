//! Client Registry.
//!
//! Registration follows RFC 7591 and RFC 7592: the registry validates the
//! submitted metadata, generates the client identifier and credentials, and
//! returns the secret and registration access token exactly once. Only their
//! SHA-384 digests are stored.

use std::sync::Arc;

use chrono::Utc;
use idp_core::event::EventBuilder;
use idp_core::{EventListener, EventType, ProviderConfig};
use idp_crypto::random::{generate_client_id, generate_client_secret};
use idp_crypto::{constant_time_eq, digest_b64url};
use idp_model::{Client, ClientMetadata, ClientType, Scopes};
use idp_storage::ClientStore;
use url::Url;

use crate::error::RegistrationError;

/// Outcome of a successful registration.
///
/// The plaintext credentials exist only here.
#[derive(Clone)]
pub struct RegisteredClient {
    /// The stored client.
    pub client: Client,
    /// Client secret for confidential clients.
    pub client_secret: Option<String>,
    /// Token authorizing later updates of this registration.
    pub registration_access_token: String,
}

impl std::fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Validated, normalized metadata.
struct CheckedMetadata {
    redirect_uris: Vec<String>,
    scopes: Scopes,
}

/// Registry of OAuth clients.
pub struct ClientRegistry<S: ClientStore + ?Sized> {
    store: Arc<S>,
    config: Arc<ProviderConfig>,
    events: Arc<dyn EventListener>,
}

impl<S: ClientStore + ?Sized> ClientRegistry<S> {
    /// Creates a registry over `store`.
    pub fn new(store: Arc<S>, config: Arc<ProviderConfig>, events: Arc<dyn EventListener>) -> Self {
        Self {
            store,
            config,
            events,
        }
    }

    /// Registers a new client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRedirectUri` or `InvalidMetadata` for rejected
    /// metadata, or a storage error.
    pub fn register(&self, metadata: &ClientMetadata) -> Result<RegisteredClient, RegistrationError> {
        let checked = self.check_metadata(metadata)?;

        let client_secret = match metadata.client_type {
            ClientType::Confidential => Some(generate_client_secret()),
            ClientType::Public => None,
        };
        let registration_access_token = generate_client_secret();
        let now = Utc::now();

        let client = Client {
            client_id: generate_client_id(),
            client_type: metadata.client_type,
            secret_hash: client_secret.as_deref().map(digest_b64url),
            registration_token_hash: digest_b64url(&registration_access_token),
            redirect_uris: checked.redirect_uris,
            grant_types: metadata.grant_types.clone(),
            response_types: metadata.response_types.clone(),
            scopes: checked.scopes,
            client_name: metadata.client_name.clone(),
            introspection_allowed: metadata.introspection_allowed,
            created_at: now,
            updated_at: now,
        };

        self.store.put_client(&client)?;

        tracing::info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            "client registered"
        );
        self.events.on_event(
            &EventBuilder::new(EventType::ClientRegistered)
                .client(&client.client_id)
                .detail("client_type", client.client_type.as_str())
                .build(),
        );

        Ok(RegisteredClient {
            client,
            client_secret,
            registration_access_token,
        })
    }

    /// Returns a registered client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such client exists, or a storage error.
    pub fn get(&self, client_id: &str) -> Result<Client, RegistrationError> {
        self.store
            .get_client(client_id)?
            .ok_or_else(|| RegistrationError::NotFound(client_id.to_string()))
    }

    /// Replaces a client's metadata.
    ///
    /// The client type cannot change and credentials are kept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown client, `Unauthorized` if the
    /// registration access token does not match, a validation error for
    /// rejected metadata, or a storage error.
    pub fn update(
        &self,
        client_id: &str,
        metadata: &ClientMetadata,
        registration_access_token: &str,
    ) -> Result<Client, RegistrationError> {
        let mut client = self.get(client_id)?;

        let presented = digest_b64url(registration_access_token);
        if !constant_time_eq(presented.as_bytes(), client.registration_token_hash.as_bytes()) {
            tracing::warn!(client_id, "client update with invalid registration access token");
            return Err(RegistrationError::Unauthorized);
        }

        if metadata.client_type != client.client_type {
            return Err(RegistrationError::InvalidMetadata(
                "client_type cannot be changed".to_string(),
            ));
        }

        let checked = self.check_metadata(metadata)?;
        client.redirect_uris = checked.redirect_uris;
        client.grant_types = metadata.grant_types.clone();
        client.response_types = metadata.response_types.clone();
        client.scopes = checked.scopes;
        client.client_name = metadata.client_name.clone();
        client.introspection_allowed = metadata.introspection_allowed;
        client.updated_at = Utc::now();

        self.store.update_client(&client)?;

        tracing::info!(client_id, "client updated");
        self.events
            .on_event(&EventBuilder::new(EventType::ClientUpdated).client(client_id).build());

        Ok(client)
    }

    fn check_metadata(&self, metadata: &ClientMetadata) -> Result<CheckedMetadata, RegistrationError> {
        if metadata.redirect_uris.is_empty() {
            return Err(RegistrationError::InvalidRedirectUri(
                "at least one redirect_uri is required".to_string(),
            ));
        }
        for uri in &metadata.redirect_uris {
            self.check_redirect_uri(uri)?;
        }

        if metadata.grant_types.is_empty() {
            return Err(RegistrationError::InvalidMetadata(
                "grant_types must not be empty".to_string(),
            ));
        }
        if metadata.response_types.is_empty() {
            return Err(RegistrationError::InvalidMetadata(
                "response_types must not be empty".to_string(),
            ));
        }

        let scopes = Scopes::parse(metadata.scope.as_deref().unwrap_or(idp_core::config::OPENID_SCOPE));
        if !scopes.contains(idp_core::config::OPENID_SCOPE) {
            return Err(RegistrationError::InvalidMetadata(
                "scope must include openid".to_string(),
            ));
        }
        if let Some(unknown) = scopes.iter().find(|s| !self.config.supports_scope(s)) {
            return Err(RegistrationError::InvalidMetadata(format!(
                "scope '{unknown}' is not supported"
            )));
        }

        let mut redirect_uris = metadata.redirect_uris.clone();
        redirect_uris.dedup();

        Ok(CheckedMetadata {
            redirect_uris,
            scopes,
        })
    }

    fn check_redirect_uri(&self, uri: &str) -> Result<(), RegistrationError> {
        let invalid = |reason: &str| RegistrationError::InvalidRedirectUri(format!("{uri}: {reason}"));

        let parsed = Url::parse(uri).map_err(|_| invalid("not an absolute URI"))?;
        if parsed.fragment().is_some() {
            return Err(invalid("must not contain a fragment"));
        }
        if parsed.cannot_be_a_base() || parsed.host().is_none() {
            return Err(invalid("must have a host"));
        }
        if !self.config.redirect_policy.permits(&parsed) {
            return Err(invalid("scheme or host not allowed"));
        }
        Ok(())
    }
}
