//! Client storage trait.

use idp_model::Client;

use crate::error::StorageResult;

/// Storage for registered clients.
///
/// Implementations must be thread-safe and support concurrent access.
pub trait ClientStore: Send + Sync {
    /// Stores a newly registered client.
    ///
    /// ## Errors
    ///
    /// Returns `StorageError::Duplicate` if the `client_id` is taken.
    fn put_client(&self, client: &Client) -> StorageResult<()>;

    /// Gets a client by `client_id`.
    fn get_client(&self, client_id: &str) -> StorageResult<Option<Client>>;

    /// Replaces an existing client.
    ///
    /// ## Errors
    ///
    /// Returns `StorageError::NotFound` if the client doesn't exist.
    fn update_client(&self, client: &Client) -> StorageResult<()>;
}
