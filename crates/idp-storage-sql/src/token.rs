//! Token storage.

use chrono::{DateTime, Utc};
use idp_model::{TokenKind, TokenRecord};
use idp_storage::{FamilyRevocation, StorageResult, TokenStore, UseOutcome};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::convert::{to_nanos, to_nanos_opt};
use crate::entities::TokenRow;
use crate::error::{from_insert_error, from_sqlite_error};
use crate::store::SqliteStore;

/// Inserts one token record. Used inside compound transactions too.
pub(crate) fn insert_token(conn: &Connection, token: &TokenRecord) -> StorageResult<()> {
    let auth_time = to_nanos_opt(token.auth_time)?;
    let issued_at = to_nanos(token.issued_at)?;
    let expires_at = to_nanos(token.expires_at)?;
    let chain_expires_at = to_nanos_opt(token.chain_expires_at)?;

    conn.execute(
        "INSERT INTO tokens (
            token_hash, kind, client_id, subject, scopes, family_id, jti,
            auth_time, issued_at, expires_at, chain_expires_at, used, revoked
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            token.token_hash,
            token.kind.to_string(),
            token.client_id,
            token.subject,
            token.scopes.to_string(),
            token.family_id,
            token.jti,
            auth_time,
            issued_at,
            expires_at,
            chain_expires_at,
            token.used,
            token.revoked,
        ],
    )
    .map_err(|e| from_insert_error(e, "Token", "token_hash"))?;
    Ok(())
}

impl TokenStore for SqliteStore {
    fn put_token(&self, token: &TokenRecord) -> StorageResult<()> {
        self.with_conn(|conn| insert_token(conn, token))
    }

    fn get_token(&self, token_hash: &str) -> StorageResult<Option<TokenRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM tokens WHERE token_hash = ?1", TokenRow::COLUMNS),
                params![token_hash],
                TokenRow::from_row,
            )
            .optional()
            .map_err(from_sqlite_error)
        })?;

        row.map(TokenRecord::try_from).transpose()
    }

    fn mark_used(&self, token_hash: &str, replacements: &[TokenRecord]) -> StorageResult<UseOutcome> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(from_sqlite_error)?;

            let flipped = tx
                .execute(
                    "UPDATE tokens SET used = 1
                     WHERE token_hash = ?1 AND used = 0 AND revoked = 0",
                    params![token_hash],
                )
                .map_err(from_sqlite_error)?;

            if flipped == 0 {
                let state: Option<(bool, bool)> = tx
                    .query_row(
                        "SELECT used, revoked FROM tokens WHERE token_hash = ?1",
                        params![token_hash],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(from_sqlite_error)?;

                return Ok(match state {
                    None => UseOutcome::NotFound,
                    Some((_, true)) => UseOutcome::Revoked,
                    Some((_, false)) => UseOutcome::AlreadyUsed,
                });
            }

            for record in replacements {
                insert_token(&tx, record)?;
            }

            tx.commit().map_err(from_sqlite_error)?;
            Ok(UseOutcome::Used)
        })
    }

    fn revoke(&self, token_hash: &str) -> StorageResult<bool> {
        let matched = self.with_conn(|conn| {
            conn.execute(
                "UPDATE tokens SET revoked = 1 WHERE token_hash = ?1",
                params![token_hash],
            )
            .map_err(from_sqlite_error)
        })?;
        Ok(matched > 0)
    }

    fn revoke_family(&self, family_id: &str, scope: FamilyRevocation) -> StorageResult<u64> {
        let changed = self.with_conn(|conn| {
            match scope {
                FamilyRevocation::All => conn.execute(
                    "UPDATE tokens SET revoked = 1 WHERE family_id = ?1 AND revoked = 0",
                    params![family_id],
                ),
                FamilyRevocation::RefreshOnly => conn.execute(
                    "UPDATE tokens SET revoked = 1
                     WHERE family_id = ?1 AND kind = ?2 AND revoked = 0",
                    params![family_id, TokenKind::Refresh.to_string()],
                ),
            }
            .map_err(from_sqlite_error)
        })?;

        tracing::debug!(family_id, changed, "revoked token family");
        Ok(changed as u64)
    }

    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let now = to_nanos(now)?;
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])
                .map_err(from_sqlite_error)
        })?;

        tracing::debug!(removed, "purged expired tokens");
        Ok(removed as u64)
    }
}
