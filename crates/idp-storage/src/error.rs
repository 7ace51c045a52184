//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// A missing code or token is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found where one was required (e.g. updating a client).
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        /// Type of entity (e.g., "Client").
        entity_type: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// Duplicate entity (unique constraint violation).
    #[error("Duplicate {entity_type}: {field} already exists")]
    Duplicate {
        /// Type of entity.
        entity_type: &'static str,
        /// Field that caused the conflict.
        field: &'static str,
    },

    /// Backend connection error.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// Backend query error.
    #[error("Storage query error: {0}")]
    Query(String),

    /// Stored data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend did not answer in time.
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    /// Internal error.
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Creates a not found error for an entity.
    #[must_use]
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a duplicate error.
    #[must_use]
    pub const fn duplicate(entity_type: &'static str, field: &'static str) -> Self {
        Self::Duplicate { entity_type, field }
    }

    /// Checks if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Checks if this is a duplicate error.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns whether the caller may retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Query(_) | Self::Timeout(_)
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
