//! # idp-protocol-oidc
//!
//! `OpenID` Connect provider core: the authorization code flow with PKCE,
//! token issuance, rotation, introspection and revocation.
//!
//! Every operation is a blocking call returning an explicit `Result`; the
//! transport layer decides how to schedule them.
//!
//! ## CNSA 2.0 Compliance
//!
//! Access and ID tokens are signed ES384. SHA-256 appears only in PKCE `S256`.
//!
//! ## Modules
//!
//! - [`authorization`] - Authorization Engine (`/authorize`)
//! - [`claims`] - JWT claim sets for access and ID tokens
//! - [`client_auth`] - Client authentication at the token endpoint
//! - [`discovery`] - `OpenID` Provider Metadata
//! - [`error`] - OAuth 2.0 error taxonomy
//! - [`jwks`] - JSON Web Key Set types
//! - [`keys`] - Signing key ring with graceful rotation
//! - [`pkce`] - RFC 7636 challenge derivation and matching
//! - [`provider`] - Wiring of the components around one store
//! - [`registry`] - Client Registry
//! - [`token`] - Token signing and response shapes
//! - [`token_engine`] - Token Engine (`/token`, `/introspect`, `/revoke`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod authorization;
pub mod claims;
pub mod client_auth;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod keys;
pub mod pkce;
pub mod provider;
pub mod registry;
pub mod token;
pub mod token_engine;

pub use authorization::{
    AuthorizationEngine, AuthorizationRejection, AuthorizationRequest, AuthorizationResponse,
    AuthorizationState, ConsentDecision, ValidatedAuthorization,
};
pub use claims::{AccessTokenClaims, IdTokenClaims};
pub use client_auth::{ClientAuthMethod, ClientCredentials, authenticate_client};
pub use discovery::ProviderMetadata;
pub use error::{ErrorResponse, OidcError, OidcResult, ProviderError, RegistrationError};
pub use jwks::{EcCurve, JsonWebKey, JsonWebKeySet, KeyType};
pub use keys::{KeyManager, SigningKeyEntry};
pub use pkce::PkceVerifier;
pub use provider::{Provider, PurgeReport};
pub use registry::{ClientRegistry, RegisteredClient};
pub use token::{IntrospectionResponse, TokenIssuer, TokenSet};
pub use token_engine::{
    CodeExchangeRequest, IntrospectionRequest, RefreshRequest, RevocationRequest, TokenEngine,
    TokenRequest,
};
