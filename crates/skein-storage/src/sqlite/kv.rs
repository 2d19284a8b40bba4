//! Config and metadata key/value stores.
//!
//! `config` holds project-level settings mirrored into the store (prefix,
//! custom status/type sets...); `metadata` holds engine-internal state
//! (export hashes, mirror hash, last-sync time).

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::sqlite::store::SqliteStore;

pub(crate) fn set_kv(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    // Table name is one of two compile-time constants, never user input.
    conn.execute(
        &format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?1, ?2)"),
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_kv(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            &format!("SELECT value FROM {table} WHERE key = ?1"),
            params![key],
            |row| row.get::<_, String>(0),
        )
        .ok();
    Ok(value)
}

impl SqliteStore {
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        set_kv(&conn, "config", key, value)
    }

    pub fn get_config_impl(&self, key: &str) -> Result<Option<String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_kv(&conn, "config", key)
    }

    pub fn get_all_config_impl(&self) -> Result<std::collections::HashMap<String, String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = std::collections::HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    pub fn set_metadata_impl(&self, key: &str, value: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        set_kv(&conn, "metadata", key, value)
    }

    pub fn get_metadata_impl(&self, key: &str) -> Result<Option<String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_kv(&conn, "metadata", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_config_impl("issue_prefix").unwrap().is_none());
        store.set_config_impl("issue_prefix", "sk").unwrap();
        assert_eq!(
            store.get_config_impl("issue_prefix").unwrap().as_deref(),
            Some("sk")
        );

        let all = store.get_all_config_impl().unwrap();
        assert_eq!(all.get("issue_prefix").map(String::as_str), Some("sk"));
    }

    #[test]
    fn metadata_is_separate_from_config() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_metadata_impl("last_sync", "2025-06-01T00:00:00Z").unwrap();
        assert!(store.get_config_impl("last_sync").unwrap().is_none());
        assert_eq!(
            store.get_metadata_impl("last_sync").unwrap().as_deref(),
            Some("2025-06-01T00:00:00Z")
        );
    }
}
