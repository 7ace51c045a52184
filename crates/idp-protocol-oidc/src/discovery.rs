//! `OpenID` Connect Discovery 1.0 implementation.
//!
//! Implements the `OpenID` Provider Metadata as defined in:
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)
//! - [RFC 8414](https://tools.ietf.org/html/rfc8414) (OAuth 2.0 Authorization Server Metadata)

use idp_core::ProviderConfig;
use idp_model::{CodeChallengeMethod, GrantType, ResponseType};
use serde::{Deserialize, Serialize};

use crate::client_auth::ClientAuthMethod;

/// `OpenID` Provider Metadata.
///
/// This is returned by the `.well-known/openid-configuration` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    // === Required Fields ===
    /// URL of the authorization server's issuer identifier.
    pub issuer: String,

    /// URL of the authorization endpoint.
    pub authorization_endpoint: String,

    /// URL of the token endpoint.
    pub token_endpoint: String,

    /// URL of the JSON Web Key Set document.
    pub jwks_uri: String,

    /// List of supported response types.
    pub response_types_supported: Vec<ResponseType>,

    /// List of supported subject types.
    pub subject_types_supported: Vec<String>,

    /// List of supported signing algorithms for ID tokens.
    pub id_token_signing_alg_values_supported: Vec<String>,

    // === Recommended Fields ===
    /// URL of the dynamic client registration endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// List of supported scopes.
    pub scopes_supported: Vec<String>,

    /// List of supported grant types.
    pub grant_types_supported: Vec<GrantType>,

    /// List of supported response modes.
    pub response_modes_supported: Vec<String>,

    /// List of supported claims.
    pub claims_supported: Vec<String>,

    // === Token Endpoint Auth ===
    /// List of supported client authentication methods for token endpoint.
    pub token_endpoint_auth_methods_supported: Vec<String>,

    // === Additional Endpoints ===
    /// URL of the token revocation endpoint.
    pub revocation_endpoint: String,

    /// Supported auth methods for revocation endpoint.
    pub revocation_endpoint_auth_methods_supported: Vec<String>,

    /// URL of the token introspection endpoint.
    pub introspection_endpoint: String,

    /// Supported auth methods for introspection endpoint.
    pub introspection_endpoint_auth_methods_supported: Vec<String>,

    // === PKCE ===
    /// Supported code challenge methods.
    pub code_challenge_methods_supported: Vec<CodeChallengeMethod>,
}

/// Returns the claims carried in issued tokens.
fn supported_claims() -> Vec<String> {
    ["sub", "iss", "aud", "exp", "iat", "auth_time", "nonce", "azp", "at_hash"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Returns supported client auth methods.
fn client_auth_methods() -> Vec<String> {
    [
        ClientAuthMethod::ClientSecretBasic,
        ClientAuthMethod::ClientSecretPost,
        ClientAuthMethod::None,
    ]
    .into_iter()
    .map(|m| m.as_str().to_string())
    .collect()
}

impl ProviderMetadata {
    /// Builds the metadata document for a provider configuration.
    #[must_use]
    pub fn from_config(config: &ProviderConfig) -> Self {
        let base = config.issuer.trim_end_matches('/');

        let mut challenge_methods = vec![CodeChallengeMethod::S256];
        if config.pkce.allow_plain {
            challenge_methods.push(CodeChallengeMethod::Plain);
        }

        Self {
            issuer: config.issuer.clone(),
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            jwks_uri: format!("{base}/jwks"),
            response_types_supported: vec![ResponseType::Code],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec![config.signature_algorithm.jwa_name().to_string()],
            registration_endpoint: Some(format!("{base}/register")),
            scopes_supported: config.supported_scopes.clone(),
            grant_types_supported: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            response_modes_supported: vec!["query".to_string()],
            claims_supported: supported_claims(),
            token_endpoint_auth_methods_supported: client_auth_methods(),
            revocation_endpoint: format!("{base}/revoke"),
            revocation_endpoint_auth_methods_supported: client_auth_methods(),
            introspection_endpoint: format!("{base}/introspect"),
            introspection_endpoint_auth_methods_supported: client_auth_methods(),
            code_challenge_methods_supported: challenge_methods,
        }
    }
}
