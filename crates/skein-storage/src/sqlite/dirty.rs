//! Dirty tracking and export hashes.
//!
//! Every mutating operation inserts its issue id into `dirty_issues`; the
//! incremental exporter drains it. Export hashes live in the metadata table
//! under `import_hash:{id}` so the exporter can skip records whose content
//! has not actually changed.

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::sqlite::issues::format_datetime;
use crate::sqlite::schema::meta_keys;
use crate::sqlite::store::SqliteStore;

pub(crate) fn mark_dirty_on_conn(conn: &Connection, issue_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?1, ?2)",
        params![issue_id, format_datetime(&Utc::now())],
    )?;
    Ok(())
}

pub(crate) fn clear_dirty_on_conn(conn: &Connection, issue_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM dirty_issues WHERE issue_id = ?1",
        params![issue_id],
    )?;
    Ok(())
}

pub(crate) fn set_export_hash_on_conn(
    conn: &Connection,
    issue_id: &str,
    content_hash: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![
            format!("{}{issue_id}", meta_keys::IMPORT_HASH_PREFIX),
            content_hash
        ],
    )?;
    Ok(())
}

pub(crate) fn get_export_hash_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![format!("{}{issue_id}", meta_keys::IMPORT_HASH_PREFIX)],
            |row| row.get::<_, String>(0),
        )
        .ok();
    Ok(value)
}

impl SqliteStore {
    pub fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT issue_id FROM dirty_issues ORDER BY issue_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn clear_dirty_issues_by_id_impl(&self, ids: &[String]) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        for id in ids {
            clear_dirty_on_conn(&conn, id)?;
        }
        Ok(())
    }

    pub fn mark_all_dirty_impl(&self) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        conn.execute(
            "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at)
             SELECT id, ?1 FROM issues",
            params![now],
        )?;
        Ok(())
    }

    pub fn get_export_hash_impl(&self, issue_id: &str) -> Result<Option<String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_export_hash_on_conn(&conn, issue_id)
    }

    pub fn set_export_hash_impl(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        set_export_hash_on_conn(&conn, issue_id, content_hash)
    }

    pub fn clear_export_hashes_impl(&self) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM metadata WHERE key LIKE ?1",
            params![format!("{}%", meta_keys::IMPORT_HASH_PREFIX)],
        )?;
        Ok(())
    }
}
