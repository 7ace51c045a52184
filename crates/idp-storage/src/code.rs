//! Authorization code storage trait.

use chrono::{DateTime, Utc};
use idp_model::{AuthorizationCode, TokenRecord};

use crate::error::StorageResult;

/// Result of [`CodeStore::mark_consumed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller consumed the code; the issued tokens were stored with it.
    Consumed,
    /// Another caller consumed the code first. Nothing was stored.
    AlreadyConsumed {
        /// Family created by the winning exchange.
        family_id: Option<String>,
    },
    /// No such code.
    NotFound,
}

/// Storage for authorization codes.
///
/// Codes are keyed by the digest of their value. Expired codes are returned
/// by [`get_code`](Self::get_code) unchanged; callers must check
/// [`AuthorizationCode::is_expired_at`].
pub trait CodeStore: Send + Sync {
    /// Stores a newly issued code.
    ///
    /// ## Errors
    ///
    /// Returns `StorageError::Duplicate` if the digest already exists.
    fn put_code(&self, code: &AuthorizationCode) -> StorageResult<()>;

    /// Gets a code by digest.
    fn get_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>>;

    /// Atomically consumes a code and stores the tokens issued for it.
    ///
    /// Either the code flips to consumed, records `family_id` and every record
    /// in `issued` becomes visible, or nothing changes. Of concurrent callers
    /// on one code exactly one observes [`ConsumeOutcome::Consumed`].
    fn mark_consumed(
        &self,
        code_hash: &str,
        family_id: &str,
        issued: &[TokenRecord],
    ) -> StorageResult<ConsumeOutcome>;

    /// Deletes codes that expired before `now`. Returns the number removed.
    fn purge_expired_codes(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}
