//! Conversion between database rows and domain models.
//!
//! Timestamps are stored as nanoseconds since the Unix epoch so that they
//! round-trip exactly and compare numerically.

use chrono::{DateTime, Utc};
use idp_model::{AuthorizationCode, Client, Scopes, TokenRecord};
use idp_storage::{StorageError, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entities::{ClientRow, CodeRow, TokenRow};

/// Converts a timestamp to nanoseconds since the epoch.
pub fn to_nanos(ts: DateTime<Utc>) -> StorageResult<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| StorageError::Serialization(format!("timestamp out of range: {ts}")))
}

/// Converts an optional timestamp to nanoseconds since the epoch.
pub fn to_nanos_opt(ts: Option<DateTime<Utc>>) -> StorageResult<Option<i64>> {
    ts.map(to_nanos).transpose()
}

/// Converts nanoseconds since the epoch to a timestamp.
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Encodes a list column as JSON text.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(column: &'static str, text: &str) -> StorageResult<T> {
    serde_json::from_str(text)
        .map_err(|e| StorageError::Serialization(format!("column {column}: {e}")))
}

fn parse_column<T>(column: &'static str, text: &str) -> StorageResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    text.parse()
        .map_err(|e: String| StorageError::Serialization(format!("column {column}: {e}")))
}

impl TryFrom<ClientRow> for Client {
    type Error = StorageError;

    fn try_from(row: ClientRow) -> StorageResult<Self> {
        Ok(Self {
            client_id: row.client_id,
            client_type: parse_column("client_type", &row.client_type)?,
            secret_hash: row.secret_hash,
            registration_token_hash: row.registration_token_hash,
            redirect_uris: from_json("redirect_uris", &row.redirect_uris)?,
            grant_types: from_json("grant_types", &row.grant_types)?,
            response_types: from_json("response_types", &row.response_types)?,
            scopes: Scopes::parse(&row.scopes),
            client_name: row.client_name,
            introspection_allowed: row.introspection_allowed,
            created_at: from_nanos(row.created_at),
            updated_at: from_nanos(row.updated_at),
        })
    }
}

impl TryFrom<CodeRow> for AuthorizationCode {
    type Error = StorageError;

    fn try_from(row: CodeRow) -> StorageResult<Self> {
        let code_challenge_method = row
            .code_challenge_method
            .as_deref()
            .map(|m| parse_column("code_challenge_method", m))
            .transpose()?;

        Ok(Self {
            code_hash: row.code_hash,
            client_id: row.client_id,
            redirect_uri: row.redirect_uri,
            scopes: Scopes::parse(&row.scopes),
            subject: row.subject,
            nonce: row.nonce,
            code_challenge: row.code_challenge,
            code_challenge_method,
            auth_time: row.auth_time.map(from_nanos),
            issued_at: from_nanos(row.issued_at),
            expires_at: from_nanos(row.expires_at),
            consumed: row.consumed,
            family_id: row.family_id,
        })
    }
}

impl TryFrom<TokenRow> for TokenRecord {
    type Error = StorageError;

    fn try_from(row: TokenRow) -> StorageResult<Self> {
        Ok(Self {
            token_hash: row.token_hash,
            kind: parse_column("kind", &row.kind)?,
            client_id: row.client_id,
            subject: row.subject,
            scopes: Scopes::parse(&row.scopes),
            family_id: row.family_id,
            jti: row.jti,
            auth_time: row.auth_time.map(from_nanos),
            issued_at: from_nanos(row.issued_at),
            expires_at: from_nanos(row.expires_at),
            chain_expires_at: row.chain_expires_at.map(from_nanos),
            used: row.used,
            revoked: row.revoked,
        })
    }
}
