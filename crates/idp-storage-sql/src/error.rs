//! SQLite error mapping.

use idp_storage::StorageError;
use rusqlite::{Error as SqliteError, ErrorCode};

/// Converts a `rusqlite` error to a storage error.
#[allow(clippy::needless_pass_by_value)]
pub fn from_sqlite_error(err: SqliteError) -> StorageError {
    match &err {
        SqliteError::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StorageError::Timeout(err.to_string())
            }
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::ReadOnly => {
                StorageError::Connection(err.to_string())
            }
            _ => StorageError::Query(err.to_string()),
        },
        SqliteError::FromSqlConversionFailure(..)
        | SqliteError::IntegralValueOutOfRange(..)
        | SqliteError::InvalidColumnType(..) => StorageError::Serialization(err.to_string()),
        _ => StorageError::Internal(err.to_string()),
    }
}

/// Converts an insert error, reporting unique constraint violations as duplicates.
pub fn from_insert_error(err: SqliteError, entity_type: &'static str, field: &'static str) -> StorageError {
    if let SqliteError::SqliteFailure(failure, _) = &err
        && failure.code == ErrorCode::ConstraintViolation
    {
        return StorageError::duplicate(entity_type, field);
    }
    from_sqlite_error(err)
}
