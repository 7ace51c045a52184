//! Row types mirroring the tables in [`schema`](crate::schema).
//!
//! Rows hold column values as SQLite returns them; [`convert`](crate::convert)
//! turns them into domain models.

use rusqlite::Row;

/// Row of the `clients` table.
pub struct ClientRow {
    pub client_id: String,
    pub client_type: String,
    pub secret_hash: Option<String>,
    pub registration_token_hash: String,
    pub redirect_uris: String,
    pub grant_types: String,
    pub response_types: String,
    pub scopes: String,
    pub client_name: Option<String>,
    pub introspection_allowed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClientRow {
    pub const COLUMNS: &'static str = "client_id, client_type, secret_hash, registration_token_hash, \
        redirect_uris, grant_types, response_types, scopes, client_name, \
        introspection_allowed, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            client_id: row.get("client_id")?,
            client_type: row.get("client_type")?,
            secret_hash: row.get("secret_hash")?,
            registration_token_hash: row.get("registration_token_hash")?,
            redirect_uris: row.get("redirect_uris")?,
            grant_types: row.get("grant_types")?,
            response_types: row.get("response_types")?,
            scopes: row.get("scopes")?,
            client_name: row.get("client_name")?,
            introspection_allowed: row.get("introspection_allowed")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Row of the `auth_codes` table.
pub struct CodeRow {
    pub code_hash: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub subject: String,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub auth_time: Option<i64>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed: bool,
    pub family_id: Option<String>,
}

impl CodeRow {
    pub const COLUMNS: &'static str = "code_hash, client_id, redirect_uri, scopes, subject, nonce, \
        code_challenge, code_challenge_method, auth_time, issued_at, expires_at, \
        consumed, family_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code_hash: row.get("code_hash")?,
            client_id: row.get("client_id")?,
            redirect_uri: row.get("redirect_uri")?,
            scopes: row.get("scopes")?,
            subject: row.get("subject")?,
            nonce: row.get("nonce")?,
            code_challenge: row.get("code_challenge")?,
            code_challenge_method: row.get("code_challenge_method")?,
            auth_time: row.get("auth_time")?,
            issued_at: row.get("issued_at")?,
            expires_at: row.get("expires_at")?,
            consumed: row.get("consumed")?,
            family_id: row.get("family_id")?,
        })
    }
}

/// Row of the `tokens` table.
pub struct TokenRow {
    pub token_hash: String,
    pub kind: String,
    pub client_id: String,
    pub subject: String,
    pub scopes: String,
    pub family_id: String,
    pub jti: Option<String>,
    pub auth_time: Option<i64>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub chain_expires_at: Option<i64>,
    pub used: bool,
    pub revoked: bool,
}

impl TokenRow {
    pub const COLUMNS: &'static str = "token_hash, kind, client_id, subject, scopes, family_id, jti, \
        auth_time, issued_at, expires_at, chain_expires_at, used, revoked";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            token_hash: row.get("token_hash")?,
            kind: row.get("kind")?,
            client_id: row.get("client_id")?,
            subject: row.get("subject")?,
            scopes: row.get("scopes")?,
            family_id: row.get("family_id")?,
            jti: row.get("jti")?,
            auth_time: row.get("auth_time")?,
            issued_at: row.get("issued_at")?,
            expires_at: row.get("expires_at")?,
            chain_expires_at: row.get("chain_expires_at")?,
            used: row.get("used")?,
            revoked: row.get("revoked")?,
        })
    }
}
