//! Authorization code storage.

use chrono::{DateTime, Utc};
use idp_model::{AuthorizationCode, TokenRecord};
use idp_storage::{CodeStore, ConsumeOutcome, StorageResult};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use crate::convert::{to_nanos, to_nanos_opt};
use crate::entities::CodeRow;
use crate::error::{from_insert_error, from_sqlite_error};
use crate::store::SqliteStore;
use crate::token::insert_token;

impl CodeStore for SqliteStore {
    fn put_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        let auth_time = to_nanos_opt(code.auth_time)?;
        let issued_at = to_nanos(code.issued_at)?;
        let expires_at = to_nanos(code.expires_at)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_codes (
                    code_hash, client_id, redirect_uri, scopes, subject, nonce,
                    code_challenge, code_challenge_method, auth_time, issued_at,
                    expires_at, consumed, family_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    code.code_hash,
                    code.client_id,
                    code.redirect_uri,
                    code.scopes.to_string(),
                    code.subject,
                    code.nonce,
                    code.code_challenge,
                    code.code_challenge_method.map(|m| m.as_str()),
                    auth_time,
                    issued_at,
                    expires_at,
                    code.consumed,
                    code.family_id,
                ],
            )
            .map_err(|e| from_insert_error(e, "Code", "code_hash"))?;
            Ok(())
        })
    }

    fn get_code(&self, code_hash: &str) -> StorageResult<Option<AuthorizationCode>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM auth_codes WHERE code_hash = ?1", CodeRow::COLUMNS),
                params![code_hash],
                CodeRow::from_row,
            )
            .optional()
            .map_err(from_sqlite_error)
        })?;

        row.map(AuthorizationCode::try_from).transpose()
    }

    fn mark_consumed(
        &self,
        code_hash: &str,
        family_id: &str,
        issued: &[TokenRecord],
    ) -> StorageResult<ConsumeOutcome> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(from_sqlite_error)?;

            let flipped = tx
                .execute(
                    "UPDATE auth_codes SET consumed = 1, family_id = ?2
                     WHERE code_hash = ?1 AND consumed = 0",
                    params![code_hash, family_id],
                )
                .map_err(from_sqlite_error)?;

            if flipped == 0 {
                let winner: Option<Option<String>> = tx
                    .query_row(
                        "SELECT family_id FROM auth_codes WHERE code_hash = ?1",
                        params![code_hash],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(from_sqlite_error)?;

                // Dropping the transaction rolls it back.
                return Ok(match winner {
                    None => ConsumeOutcome::NotFound,
                    Some(family_id) => ConsumeOutcome::AlreadyConsumed { family_id },
                });
            }

            for record in issued {
                insert_token(&tx, record)?;
            }

            tx.commit().map_err(from_sqlite_error)?;
            Ok(ConsumeOutcome::Consumed)
        })
    }

    fn purge_expired_codes(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let now = to_nanos(now)?;
        let removed = self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_codes WHERE expires_at <= ?1", params![now])
                .map_err(from_sqlite_error)
        })?;

        tracing::debug!(removed, "purged expired authorization codes");
        Ok(removed as u64)
    }
}
