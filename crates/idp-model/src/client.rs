//! Client domain model.
//!
//! Clients represent applications that request authorization from the
//! provider (OAuth 2.0 / OIDC clients).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ClientType, GrantType, ResponseType, Scopes};

/// Client metadata as submitted for registration or update.
///
/// Field names follow RFC 7591 where one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Redirect URIs; at least one is required.
    pub redirect_uris: Vec<String>,

    /// Grant types. Defaults to `authorization_code`.
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<GrantType>,

    /// Response types. Defaults to `code`.
    #[serde(default = "default_response_types")]
    pub response_types: Vec<ResponseType>,

    /// Space-delimited scope the client may request. Defaults to `openid`.
    #[serde(default)]
    pub scope: Option<String>,

    /// Whether the client can keep a secret.
    #[serde(default)]
    pub client_type: ClientType,

    /// Display name.
    #[serde(default)]
    pub client_name: Option<String>,

    /// May introspect tokens issued to other clients.
    #[serde(default)]
    pub introspection_allowed: bool,
}

fn default_grant_types() -> Vec<GrantType> {
    vec![GrantType::AuthorizationCode]
}

fn default_response_types() -> Vec<ResponseType> {
    vec![ResponseType::Code]
}

impl ClientMetadata {
    /// Creates metadata for a confidential client with one redirect URI.
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uris: vec![redirect_uri.into()],
            grant_types: default_grant_types(),
            response_types: default_response_types(),
            scope: None,
            client_type: ClientType::Confidential,
            client_name: None,
            introspection_allowed: false,
        }
    }

    /// Marks the client as public.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.client_type = ClientType::Public;
        self
    }

    /// Adds a redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uris.push(uri.into());
        self
    }

    /// Sets the grant types.
    #[must_use]
    pub fn with_grant_types(mut self, grant_types: impl IntoIterator<Item = GrantType>) -> Self {
        self.grant_types = grant_types.into_iter().collect();
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Allows the client to introspect foreign tokens.
    #[must_use]
    pub const fn with_introspection(mut self) -> Self {
        self.introspection_allowed = true;
        self
    }
}

/// A registered client.
///
/// Credentials are held as SHA-384 digests only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier (OAuth `client_id`).
    pub client_id: String,
    /// Confidential or public.
    pub client_type: ClientType,
    /// Digest of the client secret (confidential clients only).
    pub secret_hash: Option<String>,
    /// Digest of the registration access token.
    pub registration_token_hash: String,
    /// Registered redirect URIs (exact match).
    pub redirect_uris: Vec<String>,
    /// Allowed grant types.
    pub grant_types: Vec<GrantType>,
    /// Allowed response types.
    pub response_types: Vec<ResponseType>,
    /// Allowed scopes.
    pub scopes: Scopes,
    /// Display name.
    pub client_name: Option<String>,
    /// May introspect tokens issued to other clients.
    pub introspection_allowed: bool,
    /// When the client was registered.
    pub created_at: DateTime<Utc>,
    /// When the client was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Returns whether this is a public client.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }

    /// Checks the redirect URI against the registered set. Exact string match only.
    #[must_use]
    pub fn is_valid_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Returns whether the client may use `grant_type`.
    #[must_use]
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Returns whether the client may use `response_type`.
    #[must_use]
    pub fn allows_response_type(&self, response_type: ResponseType) -> bool {
        self.response_types.contains(&response_type)
    }

    /// Returns whether every requested scope is allowed for this client.
    #[must_use]
    pub fn allows_scopes(&self, requested: &Scopes) -> bool {
        requested.is_subset(&self.scopes)
    }
}
