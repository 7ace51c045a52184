//! OIDC protocol error types.
//!
//! Implements OAuth 2.0 and `OpenID` Connect error responses as defined in:
//! - RFC 6749 (OAuth 2.0)
//! - RFC 7591 / RFC 7592 (Dynamic Client Registration)
//!
//! Protocol errors and infrastructure failures are separate variants. A store
//! outage surfaces as [`OidcError::Storage`], never as `invalid_grant`.

use idp_core::ConfigError;
use idp_crypto::SignatureError;
use idp_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OIDC protocol errors.
#[derive(Debug, Error)]
pub enum OidcError {
    /// Invalid request parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Invalid, expired, consumed or mismatched grant.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Client is not authorized for this grant or response type.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// Unsupported grant type.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Unsupported response type.
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    /// Invalid scope.
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// Access denied by resource owner.
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// Server error.
    #[error("server_error: {0}")]
    ServerError(String),

    /// Temporarily unavailable.
    #[error("temporarily_unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// Persistence failure.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Token signing failure.
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl OidcError {
    /// Returns the OAuth 2.0 error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::TemporarilyUnavailable(_) => "temporarily_unavailable",
            Self::Storage(e) if e.is_retryable() => "temporarily_unavailable",
            Self::ServerError(_) | Self::Storage(_) | Self::Signing(_) => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidScope(_)
            | Self::UnsupportedGrantType(_)
            | Self::UnsupportedResponseType(_)
            | Self::InvalidGrant(_) => 400,
            Self::InvalidClient(_) => 401,
            Self::AccessDenied(_) | Self::UnauthorizedClient(_) => 403,
            Self::TemporarilyUnavailable(_) => 503,
            Self::Storage(e) if e.is_retryable() => 503,
            Self::ServerError(_) | Self::Storage(_) | Self::Signing(_) => 500,
        }
    }

    /// Returns whether the caller may retry the same request.
    ///
    /// Only infrastructure failures are retryable; protocol errors are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TemporarilyUnavailable(_) => true,
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns whether this is an infrastructure failure rather than a
    /// protocol error.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Signing(_) | Self::ServerError(_) | Self::TemporarilyUnavailable(_)
        )
    }

    /// Returns the human-readable description without the code prefix.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidScope(d)
            | Self::AccessDenied(d)
            | Self::ServerError(d)
            | Self::TemporarilyUnavailable(d) => d.clone(),
            // Internal details stay in logs.
            Self::Storage(_) | Self::Signing(_) => "internal failure".to_string(),
        }
    }

    /// Creates an error response for OAuth 2.0/OIDC.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(self.description()),
            error_uri: None,
        }
    }
}

impl From<SignatureError> for OidcError {
    fn from(err: SignatureError) -> Self {
        Self::Signing(err.to_string())
    }
}

/// OAuth 2.0 error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,

    /// Human-readable error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// URI with more information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// Result type for OIDC operations.
pub type OidcResult<T> = Result<T, OidcError>;

/// Client registration errors.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A redirect URI is missing, malformed or outside the allow policy.
    #[error("invalid_redirect_uri: {0}")]
    InvalidRedirectUri(String),

    /// Some other metadata value is invalid.
    #[error("invalid_client_metadata: {0}")]
    InvalidMetadata(String),

    /// No client with this identifier.
    #[error("client not found: {0}")]
    NotFound(String),

    /// The registration access token did not match.
    #[error("invalid registration access token")]
    Unauthorized,

    /// Persistence failure.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl RegistrationError {
    /// Returns the RFC 7591 / RFC 7592 error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::InvalidMetadata(_) => "invalid_client_metadata",
            Self::NotFound(_) => "invalid_client",
            Self::Unauthorized => "invalid_token",
            Self::Storage(_) => "server_error",
        }
    }
}

/// Errors raised while assembling a [`Provider`](crate::Provider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The initial signing key could not be created.
    #[error(transparent)]
    Key(#[from] SignatureError),
}
