//! Comments, events, and decision-point rows for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use skein_core::comment::{Comment, Event};
use skein_core::decision::{DecisionOption, DecisionPoint};
use skein_core::enums::EventKind;

use crate::error::{Result, StorageError};
use crate::sqlite::dirty;
use crate::sqlite::issues::{emit_event, format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    if text.trim().is_empty() {
        return Err(StorageError::invalid("comment text must not be empty"));
    }
    crate::sqlite::issues::get_issue_on_conn(conn, issue_id)?;

    let now = Utc::now();
    let now_str = format_datetime(&now);
    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;
    let id = conn.last_insert_rowid();

    emit_event(
        conn,
        issue_id,
        EventKind::CommentAdded,
        author,
        Some(text),
        &now_str,
    )?;
    dirty::mark_dirty_on_conn(conn, issue_id)?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Import path: preserves the original timestamp, skips duplicates (same
/// author, text and instant), emits no event.
pub(crate) fn import_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Comment> {
    let created_str = format_datetime(&created_at);
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM comments
             WHERE issue_id = ?1 AND author = ?2 AND text = ?3 AND created_at = ?4",
            params![issue_id, author, text, created_str],
            |row| row.get(0),
        )
        .ok();

    let id = match existing {
        Some(id) => id,
        None => {
            conn.execute(
                "INSERT INTO comments (issue_id, author, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![issue_id, author, text, created_str],
            )?;
            conn.last_insert_rowid()
        }
    };

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at,
    })
}

pub(crate) fn get_comments_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at FROM comments
         WHERE issue_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(Comment {
            id: row.get("id")?,
            issue_id: row.get("issue_id")?,
            author: row.get("author")?,
            text: row.get("text")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    })?;
    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn scan_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        kind: EventKind::from(row.get::<_, String>("kind")?.as_str()),
        actor: row.get("actor")?,
        payload: row.get("payload")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

pub(crate) fn get_events_on_conn(
    conn: &Connection,
    issue_id: &str,
    limit: i32,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, kind, actor, payload, created_at FROM events
         WHERE issue_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![issue_id, limit], scan_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Decision points
// ---------------------------------------------------------------------------

pub(crate) fn upsert_decision_on_conn(
    conn: &Connection,
    issue_id: &str,
    decision: &DecisionPoint,
) -> Result<()> {
    let options_json = serde_json::to_string(&decision.options)?;
    conn.execute(
        "INSERT OR REPLACE INTO decision_points
         (issue_id, prompt, options, default_option, iteration, max_iterations,
          prior_id, guidance, selected_option, response_text, responded_at, responded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            issue_id,
            decision.prompt,
            options_json,
            decision.default_option,
            decision.iteration,
            decision.max_iterations,
            decision.prior_id,
            decision.guidance,
            decision.selected_option,
            decision.response_text,
            decision.responded_at.as_ref().map(format_datetime),
            decision.responded_by,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_decision_on_conn(conn: &Connection, issue_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM decision_points WHERE issue_id = ?1",
        params![issue_id],
    )?;
    Ok(())
}

pub(crate) fn get_decision_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Option<DecisionPoint>> {
    let row = conn.query_row(
        "SELECT prompt, options, default_option, iteration, max_iterations,
                prior_id, guidance, selected_option, response_text, responded_at, responded_by
         FROM decision_points WHERE issue_id = ?1",
        params![issue_id],
        |row| {
            Ok((
                row.get::<_, String>("prompt")?,
                row.get::<_, String>("options")?,
                row.get::<_, String>("default_option")?,
                row.get::<_, i32>("iteration")?,
                row.get::<_, i32>("max_iterations")?,
                row.get::<_, Option<String>>("prior_id")?,
                row.get::<_, String>("guidance")?,
                row.get::<_, Option<String>>("selected_option")?,
                row.get::<_, String>("response_text")?,
                row.get::<_, Option<String>>("responded_at")?,
                row.get::<_, String>("responded_by")?,
            ))
        },
    );

    match row {
        Ok((
            prompt,
            options_json,
            default_option,
            iteration,
            max_iterations,
            prior_id,
            guidance,
            selected_option,
            response_text,
            responded_at,
            responded_by,
        )) => {
            let options: Vec<DecisionOption> = serde_json::from_str(&options_json)?;
            Ok(Some(DecisionPoint {
                prompt,
                options,
                default_option,
                iteration,
                max_iterations,
                prior_id,
                guidance,
                selected_option,
                response_text,
                responded_at: responded_at.as_deref().map(parse_datetime),
                responded_by,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Query(e)),
    }
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        add_comment_on_conn(&conn, issue_id, author, text)
    }

    pub fn get_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_comments_on_conn(&conn, issue_id)
    }

    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_events_on_conn(&conn, issue_id, limit)
    }

    pub fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, kind, actor, payload, created_at FROM events
             WHERE id > ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![since_id], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
