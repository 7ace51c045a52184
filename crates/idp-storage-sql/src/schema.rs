//! Database schema.

use rusqlite::Connection;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS clients (
    client_id               TEXT PRIMARY KEY,
    client_type             TEXT NOT NULL,
    secret_hash             TEXT,
    registration_token_hash TEXT NOT NULL,
    redirect_uris           TEXT NOT NULL,
    grant_types             TEXT NOT NULL,
    response_types          TEXT NOT NULL,
    scopes                  TEXT NOT NULL,
    client_name             TEXT,
    introspection_allowed   INTEGER NOT NULL,
    created_at              INTEGER NOT NULL,
    updated_at              INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS auth_codes (
    code_hash             TEXT PRIMARY KEY,
    client_id             TEXT NOT NULL,
    redirect_uri          TEXT NOT NULL,
    scopes                TEXT NOT NULL,
    subject               TEXT NOT NULL,
    nonce                 TEXT,
    code_challenge        TEXT,
    code_challenge_method TEXT,
    auth_time             INTEGER,
    issued_at             INTEGER NOT NULL,
    expires_at            INTEGER NOT NULL,
    consumed              INTEGER NOT NULL DEFAULT 0,
    family_id             TEXT
);

CREATE INDEX IF NOT EXISTS idx_auth_codes_expires_at ON auth_codes (expires_at);

CREATE TABLE IF NOT EXISTS tokens (
    token_hash       TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    client_id        TEXT NOT NULL,
    subject          TEXT NOT NULL,
    scopes           TEXT NOT NULL,
    family_id        TEXT NOT NULL,
    jti              TEXT,
    auth_time        INTEGER,
    issued_at        INTEGER NOT NULL,
    expires_at       INTEGER NOT NULL,
    chain_expires_at INTEGER,
    used             INTEGER NOT NULL DEFAULT 0,
    revoked          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tokens_family_id ON tokens (family_id);
CREATE INDEX IF NOT EXISTS idx_tokens_expires_at ON tokens (expires_at);
";

/// Creates missing tables and records the schema version.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
