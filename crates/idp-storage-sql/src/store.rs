//! Connection management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use idp_storage::StorageResult;
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::from_sqlite_error;
use crate::schema;

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// Configuration for a database file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (and if needed creates) a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: &SqliteConfig) -> StorageResult<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(from_sqlite_error)?;

        conn.busy_timeout(config.busy_timeout)
            .map_err(from_sqlite_error)?;

        if config.path.is_some() {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(from_sqlite_error)?;
            tracing::debug!(journal_mode = %mode, "opened sqlite database");
        }

        schema::migrate(&conn).map_err(from_sqlite_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a store backed by a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_path(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(&SqliteConfig::file(path.as_ref()))
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// Runs `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}
