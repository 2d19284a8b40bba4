//! [`SqliteStore`] -- the SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use skein_core::cancel::CancelToken;

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// Deadline for the closing WAL checkpoint, in milliseconds.
const CLOSE_DEADLINE_MS: u64 = 5_000;

/// SQLite-backed implementation of [`Storage`](crate::traits::Storage).
///
/// The connection sits behind a `Mutex`: the in-process writer path
/// serialises here, and `run_in_transaction` takes the same lock for its
/// whole scope so transactional reads see the writer's state.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
    /// Checked at every public entry point and between multi-row batches.
    pub(crate) cancel: CancelToken,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` with a fresh cancel token.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_token(path, CancelToken::new())
    }

    /// Opens (or creates) a database, wiring in the caller's cancel token.
    pub fn open_with_token(path: impl AsRef<Path>, cancel: CancelToken) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening issue database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            cancel,
        };
        store.configure_connection()?;
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory issue database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
            cancel: CancelToken::new(),
        };
        store.configure_connection()?;
        store.init_schema()?;
        Ok(store)
    }

    /// The token this store watches.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Surfaces `Cancelled` once the token flips. Called at operation entry
    /// and between batch items.
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn configure_connection(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        let version: std::result::Result<i32, _> = conn.query_row(
            "SELECT value FROM config WHERE key = 'schema_version'",
            [],
            |row| {
                let v: String = row.get(0)?;
                Ok(v.parse::<i32>().unwrap_or(0))
            },
        );
        if let Ok(v) = version {
            if v >= schema::CURRENT_SCHEMA_VERSION {
                debug!(version = v, "schema already current");
                return Ok(());
            }
        }

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)
                .map_err(|e| StorageError::Migration {
                    name: "init_schema".into(),
                    reason: format!("{e}\nstatement: {}", truncate(stmt, 120)),
                })?;
        }

        Self::run_migrations_on_conn(&conn)?;

        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES ('schema_version', ?1)",
            rusqlite::params![schema::CURRENT_SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| StorageError::Migration {
            name: "schema_version".into(),
            reason: e.to_string(),
        })?;

        info!(version = schema::CURRENT_SCHEMA_VERSION, "schema initialized");
        Ok(())
    }

    fn run_migrations_on_conn(conn: &Connection) -> Result<()> {
        for &(name, sql) in schema::MIGRATIONS {
            let key = format!("migration:{name}");
            let applied: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM metadata WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get::<_, i32>(0),
                )
                .unwrap_or(0)
                > 0;
            if applied {
                debug!(name, "migration already applied");
                continue;
            }

            debug!(name, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| StorageError::Migration {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, 'applied')",
                rusqlite::params![key],
            )
            .map_err(|e| StorageError::Migration {
                name: name.to_string(),
                reason: format!("failed to record migration: {e}"),
            })?;
        }
        Ok(())
    }

    /// Acquires the connection lock; shared helper for every operation module.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }

    /// Flushes the WAL so a clean teardown leaves a compact database.
    ///
    /// The checkpoint runs under the connection's 5s busy timeout; a slow or
    /// contended checkpoint is logged and abandoned rather than allowed to
    /// hang a user-visible command.
    pub fn close_impl(&self) -> Result<()> {
        let started = Instant::now();
        let conn = self.lock_conn()?;
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
            warn!(error = %e, "wal checkpoint failed during close; continuing teardown");
        }
        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 > CLOSE_DEADLINE_MS {
            warn!(?elapsed, "store close exceeded its deadline");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION.to_string());
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn cancel_token_propagates() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.check_cancelled().is_ok());
        store.cancel_token().cancel();
        assert!(matches!(
            store.check_cancelled().unwrap_err(),
            StorageError::Cancelled
        ));
    }

    #[test]
    fn on_disk_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("issues.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.close_impl().unwrap();
        }
        // Re-open sees the schema without re-running DDL.
        let store = SqliteStore::open(&path).unwrap();
        store.close_impl().unwrap();
    }
}
