//! Label operations for [`SqliteStore`].
//!
//! Labels are lowercase-normalised on the way in and idempotent: adding a
//! label twice is a no-op and only actual changes emit events.

use chrono::Utc;
use rusqlite::{Connection, params};

use skein_core::enums::EventKind;
use skein_core::issue::Issue;
use skein_core::validation::{MAX_LABEL_BYTES, normalize_label};

use crate::error::{Result, StorageError};
use crate::sqlite::dirty;
use crate::sqlite::issues::{ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, scan_issue};
use crate::sqlite::store::SqliteStore;

/// Raw row insert, no normalisation or events. Used by issue creation where
/// the label set arrives already normalised.
pub(crate) fn insert_label_row(conn: &Connection, issue_id: &str, label: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
        params![issue_id, label],
    )?;
    Ok(())
}

pub(crate) fn add_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let label = normalize_label(label);
    if label.is_empty() {
        return Err(StorageError::invalid("label must not be empty"));
    }
    if label.len() > MAX_LABEL_BYTES {
        return Err(StorageError::invalid(format!(
            "label '{label}' exceeds {MAX_LABEL_BYTES} bytes"
        )));
    }

    // Existence check keeps NotFound distinct from a silent no-op.
    crate::sqlite::issues::get_issue_on_conn(conn, issue_id)?;

    let affected = conn.execute(
        "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
        params![issue_id, label],
    )?;
    if affected > 0 {
        let now_str = format_datetime(&Utc::now());
        emit_event(
            conn,
            issue_id,
            EventKind::LabelAdded,
            actor,
            Some(&label),
            &now_str,
        )?;
        dirty::mark_dirty_on_conn(conn, issue_id)?;
    }
    Ok(())
}

pub(crate) fn remove_label_on_conn(
    conn: &Connection,
    issue_id: &str,
    label: &str,
    actor: &str,
) -> Result<()> {
    let label = normalize_label(label);
    let affected = conn.execute(
        "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
        params![issue_id, label],
    )?;
    if affected > 0 {
        let now_str = format_datetime(&Utc::now());
        emit_event(
            conn,
            issue_id,
            EventKind::LabelRemoved,
            actor,
            Some(&label),
            &now_str,
        )?;
        dirty::mark_dirty_on_conn(conn, issue_id)?;
    }
    Ok(())
}

pub(crate) fn get_labels_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label ASC",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| row.get::<_, String>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

impl SqliteStore {
    pub fn add_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        add_label_on_conn(&conn, issue_id, label, actor)
    }

    pub fn remove_label_impl(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        remove_label_on_conn(&conn, issue_id, label, actor)
    }

    pub fn get_labels_impl(&self, issue_id: &str) -> Result<Vec<String>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_labels_on_conn(&conn, issue_id)
    }

    pub fn get_issues_by_label_impl(&self, label: &str) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN labels ON labels.issue_id = issues.id
             WHERE labels.label = ?1
             ORDER BY issues.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![normalize_label(label)], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }
}
