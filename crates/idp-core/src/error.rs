//! Configuration errors.
//!
//! Protocol and storage errors live next to the code that raises them
//! (`idp-protocol-oidc`, `idp-storage`); this crate only owns the errors of
//! its own configuration layer.

use thiserror::Error;

/// Error raised when a [`ProviderConfig`](crate::ProviderConfig) is rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field value is outside its permitted range.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable reason.
        reason: String,
    },

    /// The issuer is not an absolute URL.
    #[error("invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// Signature algorithm is not supported.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl ConfigError {
    /// Creates an [`ConfigError::InvalidValue`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
