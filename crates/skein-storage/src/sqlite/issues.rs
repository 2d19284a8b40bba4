//! Issue CRUD for [`SqliteStore`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row, params};

use skein_core::content_hash::compute_content_hash;
use skein_core::enums::{EventKind, IssueType, Status};
use skein_core::filter::IssueFilter;
use skein_core::ids;
use skein_core::issue::Issue;
use skein_core::validation;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{comments, dependencies, dirty, labels};
use crate::traits::IssuePatch;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a fixed order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    spec_id, status, priority, issue_type, assignee, owner,
    created_at, updated_at, closed_at, close_reason, closed_by_session,
    external_ref, metadata, pinned, ephemeral, is_template
"#;

/// Same list prefixed with `issues.` for JOIN queries where column names
/// would otherwise be ambiguous.
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.spec_id, issues.status, issues.priority, issues.issue_type, issues.assignee, issues.owner,
    issues.created_at, issues.updated_at, issues.closed_at, issues.close_reason, issues.closed_by_session,
    issues.external_ref, issues.metadata, issues.pinned, issues.ephemeral, issues.is_template
"#;

// ---------------------------------------------------------------------------
// Row scanning and timestamp text
// ---------------------------------------------------------------------------

/// Deserialises a row into an [`Issue`]. Column order MUST match
/// [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let metadata_str: String = row.get("metadata")?;
    let metadata = if metadata_str.is_empty() || metadata_str == "{}" {
        None
    } else {
        serde_json::value::RawValue::from_string(metadata_str).ok()
    };

    let closed_at_str: Option<String> = row.get("closed_at")?;

    let mut issue = Issue::default();
    issue.id = row.get("id")?;
    issue.content_hash = row.get("content_hash")?;
    issue.title = row.get("title")?;
    issue.description = row.get("description")?;
    issue.design = row.get("design")?;
    issue.acceptance_criteria = row.get("acceptance_criteria")?;
    issue.notes = row.get("notes")?;
    issue.spec_id = row.get("spec_id")?;
    issue.status = Status::from(row.get::<_, String>("status")?);
    issue.priority = row.get("priority")?;
    issue.issue_type = IssueType::from(row.get::<_, String>("issue_type")?);
    issue.assignee = row.get("assignee")?;
    issue.owner = row.get("owner")?;
    issue.created_at = parse_datetime(&row.get::<_, String>("created_at")?);
    issue.updated_at = parse_datetime(&row.get::<_, String>("updated_at")?);
    issue.closed_at = closed_at_str.as_deref().map(parse_datetime);
    issue.close_reason = row.get("close_reason")?;
    issue.closed_by_session = row.get("closed_by_session")?;
    issue.external_ref = row.get("external_ref")?;
    issue.metadata = metadata;
    issue.pinned = row.get::<_, i32>("pinned")? != 0;
    issue.ephemeral = row.get::<_, i32>("ephemeral")? != 0;
    issue.is_template = row.get::<_, i32>("is_template")? != 0;
    Ok(issue)
}

/// Formats a timestamp as the TEXT stored in SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses stored TEXT back into a timestamp, tolerating older encodings.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

// ---------------------------------------------------------------------------
// Shared write helpers (used by store, transaction, and batch paths)
// ---------------------------------------------------------------------------

/// Reads the project prefix mirrored into the store's config table.
pub(crate) fn configured_prefix(conn: &Connection) -> Option<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = 'issue_prefix'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .filter(|p| !p.is_empty())
}

fn config_list(conn: &Connection, key: &str) -> Vec<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// Project-declared custom statuses.
pub(crate) fn custom_statuses(conn: &Connection) -> Vec<String> {
    config_list(conn, "statuses.custom")
}

/// Project-declared custom issue types.
pub(crate) fn custom_types(conn: &Connection) -> Vec<String> {
    config_list(conn, "types.custom")
}

/// Appends an event row.
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    kind: EventKind,
    actor: &str,
    payload: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, kind, actor, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![issue_id, kind.as_str(), actor, payload, created_at],
    )?;
    Ok(())
}

/// Monotonic `updated_at`: never earlier than the stored value plus a tick,
/// even when wall clocks wobble between invocations.
pub(crate) fn next_updated_at(conn: &Connection, id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let current: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM issues WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .ok();
    match current {
        Some(text) => {
            let stored = parse_datetime(&text);
            if now > stored {
                now
            } else {
                stored + Duration::milliseconds(1)
            }
        }
        None => now,
    }
}

/// Inserts one issue row (plus its labels and decision point), emits the
/// `created` event, and marks it dirty.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    validation::validate_with(issue, &custom_statuses(conn), &custom_types(conn))?;

    if issue.id.is_empty() || ids::parse_id(&issue.id).is_none() {
        return Err(StorageError::invalid(format!(
            "issue id '{}' does not match the identifier grammar",
            issue.id
        )));
    }
    if let Some(prefix) = configured_prefix(conn) {
        if !ids::has_prefix(&issue.id, &prefix) {
            return Err(StorageError::PrefixMismatch {
                id: issue.id.clone(),
                prefix,
            });
        }
    }

    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM issues WHERE id = ?1",
            params![issue.id],
            |_| Ok(()),
        )
        .is_ok();
    if exists {
        return Err(StorageError::DuplicateId {
            id: issue.id.clone(),
        });
    }

    let content_hash = compute_content_hash(issue);
    let metadata_str = match issue.metadata.as_ref() {
        Some(m) => validation::normalize_metadata(m.get())?,
        None => "{}".to_string(),
    };

    let now_str = format_datetime(&Utc::now());
    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23
            )"
        ),
        params![
            issue.id,                                  // 1
            content_hash,                              // 2
            issue.title,                               // 3
            issue.description,                         // 4
            issue.design,                              // 5
            issue.acceptance_criteria,                 // 6
            issue.notes,                               // 7
            issue.spec_id,                             // 8
            issue.status.as_str(),                     // 9
            issue.priority,                            // 10
            issue.issue_type.as_str(),                 // 11
            issue.assignee,                            // 12
            issue.owner,                               // 13
            format_datetime(&issue.created_at),        // 14
            format_datetime(&issue.updated_at),        // 15
            issue.closed_at.as_ref().map(format_datetime), // 16
            issue.close_reason,                        // 17
            issue.closed_by_session,                   // 18
            issue.external_ref,                        // 19
            metadata_str,                              // 20
            issue.pinned as i32,                       // 21
            issue.ephemeral as i32,                    // 22
            issue.is_template as i32,                  // 23
        ],
    )?;

    for label in &issue.labels {
        labels::insert_label_row(conn, &issue.id, &validation::normalize_label(label))?;
    }
    if let Some(ref decision) = issue.decision {
        comments::upsert_decision_on_conn(conn, &issue.id, decision)?;
    }

    emit_event(conn, &issue.id, EventKind::Created, actor, None, &now_str)?;
    dirty::mark_dirty_on_conn(conn, &issue.id)?;
    Ok(())
}

/// Fetches one issue (relational fields left unhydrated).
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })
}

/// Fetches one issue with labels, dependencies, comments and decision.
pub(crate) fn get_issue_full_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let mut issue = get_issue_on_conn(conn, id)?;
    hydrate_issue(conn, &mut issue)?;
    Ok(issue)
}

pub(crate) fn hydrate_issue(conn: &Connection, issue: &mut Issue) -> Result<()> {
    issue.labels = labels::get_labels_on_conn(conn, &issue.id)?;
    issue.dependencies = dependencies::get_dependency_records_on_conn(conn, &issue.id)?;
    issue.comments = comments::get_comments_on_conn(conn, &issue.id)?;
    issue.decision = comments::get_decision_on_conn(conn, &issue.id)?;
    Ok(())
}

/// Applies a partial update, bumping `updated_at` monotonically.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    patch: &IssuePatch,
    actor: &str,
) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }

    // Existence check up front so patch validation errors do not mask it.
    let current = get_issue_on_conn(conn, id)?;

    if let Some(priority) = patch.priority {
        if !(0..=4).contains(&priority) {
            return Err(StorageError::invalid(format!(
                "priority must be between 0 and 4 (got {priority})"
            )));
        }
    }
    if let Some(ref title) = patch.title {
        if title.is_empty() {
            return Err(StorageError::invalid("title is required"));
        }
        if title.len() > validation::MAX_TITLE_BYTES {
            return Err(StorageError::invalid(format!(
                "title must be {} bytes or less (got {})",
                validation::MAX_TITLE_BYTES,
                title.len()
            )));
        }
    }
    if let Some(ref status) = patch.status {
        if !status.is_valid_with(&custom_statuses(conn)) {
            return Err(StorageError::invalid(format!(
                "status '{status}' is not built in and not declared in config"
            )));
        }
        // Closing requires a reason and a close timestamp: that is
        // close_issue's job, not a field patch.
        if *status == Status::Closed {
            return Err(StorageError::invalid(
                "use close_issue to close an issue",
            ));
        }
    }
    if let Some(ref issue_type) = patch.issue_type {
        if !issue_type.is_valid_with(&custom_types(conn)) {
            return Err(StorageError::invalid(format!(
                "issue type '{issue_type}' is not built in and not declared in config"
            )));
        }
    }
    if let Some(Some(ref decision)) = patch.decision {
        let target_type = patch.issue_type.as_ref().unwrap_or(&current.issue_type);
        if !target_type.is_gate() {
            return Err(StorageError::invalid(
                "only gate issues may carry a decision point",
            ));
        }
        if !decision.is_well_formed() {
            return Err(StorageError::invalid("decision point is malformed"));
        }
    }

    let mut set_clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! set_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = patch.$field {
                set_clauses.push(concat!($col, " = ?").to_string());
                values.push(Box::new(val.clone()));
            }
        };
    }
    macro_rules! set_bool {
        ($field:ident, $col:expr) => {
            if let Some(val) = patch.$field {
                set_clauses.push(concat!($col, " = ?").to_string());
                values.push(Box::new(val as i32));
            }
        };
    }

    set_field!(title, "title");
    set_field!(description, "description");
    set_field!(design, "design");
    set_field!(acceptance_criteria, "acceptance_criteria");
    set_field!(notes, "notes");
    set_field!(spec_id, "spec_id");
    set_field!(assignee, "assignee");
    set_field!(owner, "owner");

    if let Some(ref status) = patch.status {
        set_clauses.push("status = ?".to_string());
        values.push(Box::new(status.as_str().to_string()));
        // Any patched status is non-closed here; clear the close marker.
        set_clauses.push("closed_at = NULL".to_string());
        set_clauses.push("close_reason = ''".to_string());
    }
    if let Some(ref issue_type) = patch.issue_type {
        set_clauses.push("issue_type = ?".to_string());
        values.push(Box::new(issue_type.as_str().to_string()));
    }
    if let Some(priority) = patch.priority {
        set_clauses.push("priority = ?".to_string());
        values.push(Box::new(priority));
    }
    if let Some(ref ext) = patch.external_ref {
        set_clauses.push("external_ref = ?".to_string());
        values.push(Box::new(ext.clone()));
    }
    if let Some(ref meta) = patch.metadata {
        let stored = match meta {
            Some(raw) => validation::normalize_metadata(raw)?,
            None => "{}".to_string(),
        };
        set_clauses.push("metadata = ?".to_string());
        values.push(Box::new(stored));
    }
    set_bool!(pinned, "pinned");
    set_bool!(ephemeral, "ephemeral");
    set_bool!(is_template, "is_template");

    let now = next_updated_at(conn, id, Utc::now());
    let now_str = format_datetime(&now);
    set_clauses.push("updated_at = ?".to_string());
    values.push(Box::new(now_str.clone()));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    values.push(Box::new(id.to_string()));

    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, refs.as_slice())?;

    if let Some(ref decision) = patch.decision {
        match decision {
            Some(dp) => comments::upsert_decision_on_conn(conn, id, dp)?,
            None => comments::delete_decision_on_conn(conn, id)?,
        }
    }

    refresh_content_hash(conn, id)?;
    emit_event(conn, id, EventKind::Updated, actor, None, &now_str)?;
    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

/// Recomputes and stores the cached content hash from the hydrated issue.
pub(crate) fn refresh_content_hash(conn: &Connection, id: &str) -> Result<()> {
    let issue = get_issue_full_on_conn(conn, id)?;
    let hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![hash, id],
    )?;
    Ok(())
}

/// Atomic claim via compare-and-set.
pub(crate) fn claim_issue_on_conn(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    let now = next_updated_at(conn, id, Utc::now());
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET assignee = ?1, status = 'in_progress', updated_at = ?2
         WHERE id = ?3 AND (assignee IS NULL OR assignee = '') AND status != 'closed'",
        params![actor, now_str, id],
    )?;

    if affected == 0 {
        // Distinguish why the CAS failed.
        let issue = get_issue_on_conn(conn, id)?;
        if !issue.assignee.is_empty() {
            return Err(StorageError::AlreadyClaimed {
                assignee: issue.assignee,
            });
        }
        return Err(StorageError::invalid("cannot claim a closed issue"));
    }

    emit_event(conn, id, EventKind::Claimed, actor, Some(actor), &now_str)?;
    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

/// Closes an issue with a mandatory reason.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
    session: &str,
) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(StorageError::BadReason);
    }

    let now = next_updated_at(conn, id, Utc::now());
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2,
         closed_by_session = ?3, updated_at = ?1 WHERE id = ?4",
        params![now_str, reason, session, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    refresh_content_hash(conn, id)?;
    emit_event(conn, id, EventKind::Closed, actor, Some(reason), &now_str)?;
    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

/// Reopens a closed issue.
pub(crate) fn reopen_issue_on_conn(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    let issue = get_issue_on_conn(conn, id)?;
    if issue.status != Status::Closed {
        return Err(StorageError::invalid(format!(
            "issue {id} is not closed"
        )));
    }

    let now = next_updated_at(conn, id, Utc::now());
    let now_str = format_datetime(&now);
    conn.execute(
        "UPDATE issues SET status = 'open', closed_at = NULL, close_reason = '',
         closed_by_session = '', updated_at = ?1 WHERE id = ?2",
        params![now_str, id],
    )?;

    refresh_content_hash(conn, id)?;
    emit_event(conn, id, EventKind::Reopened, actor, None, &now_str)?;
    dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

/// Removes one issue row and its edges (both directions). Labels, comments
/// and decision rows go via foreign-key cascade. The id stays in the dirty
/// set so the next export tombstones its mirror line.
pub(crate) fn delete_issue_on_conn(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }
    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
        params![id],
    )?;
    crate::sqlite::dirty::mark_dirty_on_conn(conn, id)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Import upsert
// ---------------------------------------------------------------------------

/// Inserts or refreshes an issue from a mirror record, preserving the
/// record's timestamps.
///
/// The imported state counts as already exported: the export hash is set
/// and the dirty flag cleared, so a following export skips the record
/// unless something else touched it.
pub(crate) fn upsert_issue_on_conn(
    conn: &Connection,
    issue: &Issue,
    actor: &str,
) -> Result<crate::traits::UpsertAction> {
    use crate::traits::UpsertAction;

    let incoming_hash = compute_content_hash(issue);

    let existing = match get_issue_full_on_conn(conn, &issue.id) {
        Ok(existing) => Some(existing),
        Err(StorageError::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };

    let action = match existing {
        None => {
            insert_issue(conn, issue, actor)?;
            UpsertAction::Created
        }
        Some(current) => {
            let current_hash = compute_content_hash(&current);
            let newer = issue.updated_at > current.updated_at;
            if !newer && incoming_hash == current_hash {
                return Ok(UpsertAction::Unchanged);
            }

            let metadata_str = match issue.metadata.as_ref() {
                Some(m) => validation::normalize_metadata(m.get())?,
                None => "{}".to_string(),
            };
            conn.execute(
                "UPDATE issues SET
                    title = ?1, description = ?2, design = ?3, acceptance_criteria = ?4,
                    notes = ?5, spec_id = ?6, status = ?7, priority = ?8, issue_type = ?9,
                    assignee = ?10, owner = ?11, created_at = ?12, updated_at = ?13,
                    closed_at = ?14, external_ref = ?15, metadata = ?16,
                    pinned = ?17, ephemeral = ?18, is_template = ?19
                 WHERE id = ?20",
                params![
                    issue.title,
                    issue.description,
                    issue.design,
                    issue.acceptance_criteria,
                    issue.notes,
                    issue.spec_id,
                    issue.status.as_str(),
                    issue.priority,
                    issue.issue_type.as_str(),
                    issue.assignee,
                    issue.owner,
                    format_datetime(&issue.created_at),
                    format_datetime(&issue.updated_at),
                    issue.closed_at.as_ref().map(format_datetime),
                    issue.external_ref,
                    metadata_str,
                    issue.pinned as i32,
                    issue.ephemeral as i32,
                    issue.is_template as i32,
                    issue.id,
                ],
            )?;

            // Labels and decision follow the record wholesale.
            conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![issue.id])?;
            for label in &issue.labels {
                labels::insert_label_row(conn, &issue.id, &validation::normalize_label(label))?;
            }
            match &issue.decision {
                Some(dp) => comments::upsert_decision_on_conn(conn, &issue.id, dp)?,
                None => comments::delete_decision_on_conn(conn, &issue.id)?,
            }

            let now_str = format_datetime(&Utc::now());
            emit_event(
                conn,
                &issue.id,
                EventKind::Updated,
                actor,
                Some("imported from mirror"),
                &now_str,
            )?;
            UpsertAction::Updated
        }
    };

    // Comments merge additively, preserving their timestamps.
    for comment in &issue.comments {
        comments::import_comment_on_conn(
            conn,
            &issue.id,
            &comment.author,
            &comment.text,
            comment.created_at,
        )?;
    }

    refresh_content_hash(conn, &issue.id)?;
    crate::sqlite::dirty::set_export_hash_on_conn(conn, &issue.id, &incoming_hash)?;
    crate::sqlite::dirty::clear_dirty_on_conn(conn, &issue.id)?;
    Ok(action)
}

/// Every issue id, sorted.
pub(crate) fn list_issue_ids_on_conn(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM issues ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Text + structured search. Ordered by priority asc, `updated_at` desc, id
/// asc so output is deterministic.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1;

    macro_rules! push_clause {
        ($clause:expr, $value:expr) => {{
            where_clauses.push(format!($clause, idx));
            values.push(Box::new($value));
            idx += 1;
        }};
    }

    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{idx} OR description LIKE ?{idx} OR notes LIKE ?{idx})"
        ));
        values.push(Box::new(format!("%{query}%")));
        idx += 1;
    }

    if !filter.statuses.is_empty() {
        let placeholders: Vec<String> = filter
            .statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", idx + i))
            .collect();
        where_clauses.push(format!("status IN ({})", placeholders.join(",")));
        for status in &filter.statuses {
            values.push(Box::new(status.as_str().to_string()));
        }
        idx += filter.statuses.len();
    }
    for status in &filter.exclude_statuses {
        push_clause!("status != ?{}", status.as_str().to_string());
    }
    if !filter.issue_types.is_empty() {
        let placeholders: Vec<String> = filter
            .issue_types
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", idx + i))
            .collect();
        where_clauses.push(format!("issue_type IN ({})", placeholders.join(",")));
        for t in &filter.issue_types {
            values.push(Box::new(t.as_str().to_string()));
        }
        idx += filter.issue_types.len();
    }

    if let Some(priority) = filter.priority {
        push_clause!("priority = ?{}", priority);
    }
    if let Some(min) = filter.priority_min {
        push_clause!("priority >= ?{}", min);
    }
    if let Some(max) = filter.priority_max {
        push_clause!("priority <= ?{}", max);
    }
    if let Some(ref assignee) = filter.assignee {
        push_clause!("assignee = ?{}", assignee.clone());
    }
    if let Some(ref owner) = filter.owner {
        push_clause!("owner = ?{}", owner.clone());
    }
    if filter.unassigned {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }
    if let Some(ref prefix) = filter.id_prefix {
        push_clause!("id LIKE ?{}", format!("{prefix}%"));
    }
    if let Some(ref prefix) = filter.spec_prefix {
        push_clause!("spec_id LIKE ?{}", format!("{prefix}%"));
    }
    if let Some(pinned) = filter.pinned {
        push_clause!("pinned = ?{}", pinned as i32);
    }
    if let Some(ephemeral) = filter.ephemeral {
        push_clause!("ephemeral = ?{}", ephemeral as i32);
    }
    if let Some(is_template) = filter.is_template {
        push_clause!("is_template = ?{}", is_template as i32);
    }
    if let Some(ref after) = filter.created_after {
        push_clause!("created_at >= ?{}", format_datetime(after));
    }
    if let Some(ref before) = filter.created_before {
        push_clause!("created_at <= ?{}", format_datetime(before));
    }
    if let Some(ref after) = filter.updated_after {
        push_clause!("updated_at >= ?{}", format_datetime(after));
    }
    if let Some(ref before) = filter.updated_before {
        push_clause!("updated_at <= ?{}", format_datetime(before));
    }

    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            values.push(Box::new(id.clone()));
        }
        idx += filter.ids.len();
    }

    for label in &filter.labels {
        push_clause!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{})",
            validation::normalize_label(label)
        );
    }
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            values.push(Box::new(validation::normalize_label(label)));
        }
        idx += filter.labels_any.len();
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql}
         ORDER BY priority ASC, updated_at DESC, id ASC{limit_sql}"
    );

    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    let _ = idx;
    Ok(issues)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    pub fn get_issue_full_impl(&self, id: &str) -> Result<Issue> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_issue_full_on_conn(&conn, id)
    }

    pub fn get_all_issues_full_impl(&self) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        drop(stmt);
        for issue in &mut issues {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            hydrate_issue(&conn, issue)?;
        }
        Ok(issues)
    }

    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders}) ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?1");
        conn.query_row(&sql, params![external_ref], scan_issue)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::not_found("issue", format!("external_ref={external_ref}"))
                }
                other => StorageError::Query(other),
            })
    }

    pub fn update_issue_impl(&self, id: &str, patch: &IssuePatch, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, patch, actor)
    }

    pub fn claim_issue_impl(&self, id: &str, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        claim_issue_on_conn(&conn, id, actor)
    }

    pub fn close_issue_impl(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
    ) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor, session)
    }

    pub fn reopen_issue_impl(&self, id: &str, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        reopen_issue_on_conn(&conn, id, actor)
    }

    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}
