//! Token storage trait.

use chrono::{DateTime, Utc};
use idp_model::TokenRecord;

use crate::error::StorageResult;

/// Result of [`TokenStore::mark_used`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseOutcome {
    /// This caller rotated the token; the replacements were stored.
    Used,
    /// The token had already been rotated. Nothing was stored.
    AlreadyUsed,
    /// The token is revoked. Nothing was stored.
    Revoked,
    /// No such token.
    NotFound,
}

/// Which members of a token family [`TokenStore::revoke_family`] revokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyRevocation {
    /// Access and refresh tokens.
    All,
    /// Refresh tokens only.
    RefreshOnly,
}

/// Storage for access and refresh token records.
///
/// Records are keyed by the digest of the token value. Expired records are
/// returned unchanged; callers must check [`TokenRecord::is_active_at`].
pub trait TokenStore: Send + Sync {
    /// Stores a token record.
    ///
    /// ## Errors
    ///
    /// Returns `StorageError::Duplicate` if the digest already exists.
    fn put_token(&self, token: &TokenRecord) -> StorageResult<()>;

    /// Gets a token record by digest.
    fn get_token(&self, token_hash: &str) -> StorageResult<Option<TokenRecord>>;

    /// Atomically marks a refresh token used and stores its replacements.
    ///
    /// Of concurrent callers on one token exactly one observes
    /// [`UseOutcome::Used`]. A revoked token is never marked used.
    fn mark_used(&self, token_hash: &str, replacements: &[TokenRecord]) -> StorageResult<UseOutcome>;

    /// Revokes a single token. Returns `false` if it does not exist.
    fn revoke(&self, token_hash: &str) -> StorageResult<bool>;

    /// Revokes the members of a family selected by `scope`. Returns the number
    /// of records that changed state.
    fn revoke_family(&self, family_id: &str, scope: FamilyRevocation) -> StorageResult<u64>;

    /// Deletes tokens that expired before `now`. Returns the number removed.
    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}
