//! Client authentication for the token, introspection and revocation
//! operations.
//!
//! Implements OAuth 2.0 client authentication methods:
//! - `client_secret_basic` - HTTP Basic authentication
//! - `client_secret_post` - Credentials in request body
//! - `none` - Public clients identify themselves by `client_id` only
//!
//! Every failure is reported as `invalid_client` with the same description,
//! whether the client is unknown or the secret is wrong.

use base64::{Engine, engine::general_purpose::STANDARD};
use idp_crypto::{constant_time_eq, digest_b64url};
use idp_model::Client;
use idp_storage::ClientStore;

use crate::error::{OidcError, OidcResult};

/// Methods for authenticating clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `client_secret_basic` - HTTP Basic auth with `client_id:client_secret`.
    ClientSecretBasic,

    /// `client_secret_post` - `client_id` and `client_secret` in request body.
    ClientSecretPost,

    /// `none` - public client.
    None,
}

impl ClientAuthMethod {
    /// Returns the registered name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }
}

/// Credentials presented by a caller.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client identifier.
    pub client_id: String,
    /// Client secret, absent for public clients.
    pub client_secret: Option<String>,
    /// How the credentials were transported.
    pub method: ClientAuthMethod,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("method", &self.method)
            .finish()
    }
}

impl ClientCredentials {
    /// Credentials for a public client.
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            method: ClientAuthMethod::None,
        }
    }

    /// Credentials sent in the request body.
    #[must_use]
    pub fn post(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            method: ClientAuthMethod::ClientSecretPost,
        }
    }

    /// Parses an HTTP `Authorization: Basic ...` header value.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` if the header is not well-formed.
    pub fn from_basic_header(header: &str) -> OidcResult<Self> {
        let malformed = || OidcError::InvalidClient("malformed basic credentials".to_string());

        let encoded = header
            .strip_prefix("Basic ")
            .or_else(|| header.strip_prefix("basic "))
            .ok_or_else(malformed)?;
        let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
        let (client_id, client_secret) = decoded.split_once(':').ok_or_else(malformed)?;

        if client_id.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: Some(client_secret.to_string()),
            method: ClientAuthMethod::ClientSecretBasic,
        })
    }
}

fn rejected() -> OidcError {
    OidcError::InvalidClient("client authentication failed".to_string())
}

/// Authenticates a caller against the registered clients.
///
/// Confidential clients must present their secret; public clients must not
/// present one.
///
/// # Errors
///
/// Returns `invalid_client` on any authentication failure, or a storage error.
pub fn authenticate_client<S: ClientStore + ?Sized>(
    store: &S,
    credentials: &ClientCredentials,
) -> OidcResult<Client> {
    let Some(client) = store.get_client(&credentials.client_id)? else {
        tracing::debug!(client_id = %credentials.client_id, "unknown client");
        return Err(rejected());
    };

    match (&client.secret_hash, &credentials.client_secret) {
        (None, None) if client.is_public() => Ok(client),
        (Some(stored), Some(presented)) if !client.is_public() => {
            let presented = digest_b64url(presented);
            if constant_time_eq(presented.as_bytes(), stored.as_bytes()) {
                Ok(client)
            } else {
                tracing::debug!(client_id = %client.client_id, "client secret mismatch");
                Err(rejected())
            }
        }
        _ => {
            tracing::debug!(
                client_id = %client.client_id,
                method = credentials.method.as_str(),
                "authentication method not allowed for client"
            );
            Err(rejected())
        }
    }
}
