//! Work queries: ready set, blocked set, epic progress, stale, statistics.

use chrono::{Duration, Utc};
use rusqlite::Connection;

use skein_core::dependency::EXTERNAL_PREFIX;
use skein_core::enums::READY_AFFECTING_TYPES_SQL;
use skein_core::filter::{StaleFilter, WorkFilter};
use skein_core::issue::Issue;
use skein_core::validation::normalize_label;

use crate::error::Result;
use crate::sqlite::issues::{ISSUE_COLUMNS, format_datetime, scan_issue};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, EpicProgress, Statistics};

/// WHERE fragment: the issue has at least one unsatisfied ready-affecting
/// blocker. The blocker must exist locally (cross-store ends never block)
/// and be anything but closed.
fn open_blocker_exists_sql() -> String {
    format!(
        "EXISTS (
            SELECT 1 FROM dependencies d
            INNER JOIN issues blocker ON blocker.id = d.depends_on_id
            WHERE d.issue_id = issues.id
              AND d.dep_type IN {READY_AFFECTING_TYPES_SQL}
              AND d.depends_on_id NOT LIKE '{EXTERNAL_PREFIX}%'
              AND blocker.status != 'closed'
        )"
    )
}

/// Ready-work ordering: a pinned high-priority item must not be displaced by
/// a noisier recent change, and the id tiebreak keeps output deterministic.
const READY_ORDER_SQL: &str = "priority ASC, pinned DESC, updated_at DESC, id ASC";

fn apply_work_filter(
    filter: &WorkFilter,
    where_clauses: &mut Vec<String>,
    values: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    idx: &mut usize,
) {
    if !filter.statuses.is_empty() {
        let placeholders: Vec<String> = filter
            .statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", *idx + i))
            .collect();
        where_clauses.push(format!("status IN ({})", placeholders.join(",")));
        for status in &filter.statuses {
            values.push(Box::new(status.as_str().to_string()));
        }
        *idx += filter.statuses.len();
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{idx}"));
        values.push(Box::new(issue_type.as_str().to_string()));
        *idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{idx}"));
        values.push(Box::new(priority));
        *idx += 1;
    }
    if let Some(max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{idx}"));
        values.push(Box::new(max));
        *idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{idx}"));
        values.push(Box::new(assignee.clone()));
        *idx += 1;
    }
    if filter.unassigned {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }
    if let Some(ref prefix) = filter.spec_prefix {
        where_clauses.push(format!("spec_id LIKE ?{idx}"));
        values.push(Box::new(format!("{prefix}%")));
        *idx += 1;
    }
    if !filter.include_ephemeral {
        where_clauses.push("ephemeral = 0".to_string());
    }
    where_clauses.push("is_template = 0".to_string());

    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{idx})"
        ));
        values.push(Box::new(normalize_label(label)));
        *idx += 1;
    }
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", *idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            values.push(Box::new(normalize_label(label)));
        }
        *idx += filter.labels_any.len();
    }
}

fn run_issue_query(
    conn: &Connection,
    where_clauses: &[String],
    values: &[Box<dyn rusqlite::types::ToSql>],
    limit: Option<i32>,
) -> Result<Vec<Issue>> {
    let where_sql = where_clauses.join(" AND ");
    let limit_sql = limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();
    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE {where_sql}
         ORDER BY {READY_ORDER_SQL}{limit_sql}"
    );

    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

impl SqliteStore {
    /// The ready set: status admitted by the filter, no open ready-affecting
    /// blocker, filter predicate satisfied. One SQL query; cost scales with
    /// the result, not the graph.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;

        let mut where_clauses = vec![format!("NOT {}", open_blocker_exists_sql())];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1;
        apply_work_filter(filter, &mut where_clauses, &mut values, &mut idx);

        run_issue_query(&conn, &where_clauses, &values, filter.limit)
    }

    /// The dual query: issues with at least one open blocker, each
    /// annotated with its blockers.
    pub fn get_blocked_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;

        let mut where_clauses = vec![open_blocker_exists_sql()];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1;
        apply_work_filter(filter, &mut where_clauses, &mut values, &mut idx);

        let blocked = run_issue_query(&conn, &where_clauses, &values, filter.limit)?;

        let blocker_sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues
             WHERE id IN (
                SELECT d.depends_on_id FROM dependencies d
                WHERE d.issue_id = ?1
                  AND d.dep_type IN {READY_AFFECTING_TYPES_SQL}
                  AND d.depends_on_id NOT LIKE '{EXTERNAL_PREFIX}%'
             ) AND status != 'closed'
             ORDER BY id ASC"
        );

        let mut result = Vec::with_capacity(blocked.len());
        let mut stmt = conn.prepare(&blocker_sql)?;
        for issue in blocked {
            if self.cancel.is_cancelled() {
                return Err(crate::error::StorageError::Cancelled);
            }
            let rows = stmt.query_map(rusqlite::params![issue.id], scan_issue)?;
            let mut blockers = Vec::new();
            for row in rows {
                blockers.push(row?);
            }
            result.push(BlockedIssue { issue, blockers });
        }
        Ok(result)
    }

    /// Status counts over an epic's `parent-child` subtree (recursive).
    pub fn get_epic_progress_impl(&self, epic_id: &str) -> Result<EpicProgress> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        epic_progress_on_conn(&conn, epic_id)
    }

    /// Epics whose entire (non-empty) subtree is closed.
    pub fn epics_eligible_for_closure_impl(&self) -> Result<Vec<EpicProgress>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM issues WHERE issue_type = 'epic' AND status != 'closed'
             ORDER BY id ASC",
        )?;
        let epic_ids: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        let mut eligible = Vec::new();
        for epic_id in epic_ids {
            if self.cancel.is_cancelled() {
                return Err(crate::error::StorageError::Cancelled);
            }
            let progress = epic_progress_on_conn(&conn, &epic_id)?;
            if progress.is_closeable() {
                eligible.push(progress);
            }
        }
        Ok(eligible)
    }

    pub fn get_stale_issues_impl(&self, filter: &StaleFilter) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;

        let cutoff = Utc::now() - Duration::days(filter.days);
        let mut where_clauses = vec![
            "updated_at < ?1".to_string(),
            "status != 'closed'".to_string(),
        ];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(format_datetime(&cutoff))];
        if let Some(ref status) = filter.status {
            where_clauses.push("status = ?2".to_string());
            values.push(Box::new(status.as_str().to_string()));
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE {where_sql}
             ORDER BY updated_at ASC{limit_sql}"
        );
        let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        self.check_cancelled()?;
        let mut stats = Statistics::default();
        {
            let conn = self.lock_conn()?;

            let count = |sql: &str| -> Result<i64> {
                Ok(conn.query_row(sql, [], |row| row.get(0))?)
            };
            stats.total_issues = count("SELECT COUNT(*) FROM issues")?;
            stats.open_issues = count("SELECT COUNT(*) FROM issues WHERE status = 'open'")?;
            stats.in_progress_issues =
                count("SELECT COUNT(*) FROM issues WHERE status = 'in_progress'")?;
            stats.blocked_issues =
                count("SELECT COUNT(*) FROM issues WHERE status = 'blocked'")?;
            stats.closed_issues = count("SELECT COUNT(*) FROM issues WHERE status = 'closed'")?;

            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues GROUP BY issue_type
                 ORDER BY COUNT(*) DESC, issue_type ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_type.push(row?);
            }
            drop(stmt);

            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM issues GROUP BY priority ORDER BY priority ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }

        stats.ready_issues = self.get_ready_work_impl(&WorkFilter::default())?.len() as i64;
        Ok(stats)
    }
}

/// Recursive subtree walk via a CTE over `parent-child` edges.
fn epic_progress_on_conn(conn: &Connection, epic_id: &str) -> Result<EpicProgress> {
    // Ensure the epic exists so callers get NotFound, not empty progress.
    crate::sqlite::issues::get_issue_on_conn(conn, epic_id)?;

    let sql = "
        WITH RECURSIVE subtree(id) AS (
            SELECT d.issue_id FROM dependencies d
            WHERE d.depends_on_id = ?1 AND d.dep_type = 'parent-child'
            UNION
            SELECT d.issue_id FROM dependencies d
            INNER JOIN subtree s ON d.depends_on_id = s.id
            WHERE d.dep_type = 'parent-child'
        )
        SELECT i.status, COUNT(*) FROM issues i
        INNER JOIN subtree s ON i.id = s.id
        GROUP BY i.status";

    let mut progress = EpicProgress {
        epic_id: epic_id.to_string(),
        ..Default::default()
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params![epic_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        progress.total += count;
        match status.as_str() {
            "open" => progress.open += count,
            "in_progress" => progress.in_progress += count,
            "blocked" => progress.blocked += count,
            "closed" => progress.closed += count,
            // Custom statuses count as open for progress purposes.
            _ => progress.open += count,
        }
    }
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::dependency::Dependency;
    use skein_core::enums::{DependencyType, IssueType, Status};
    use skein_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn blocks(from: &str, to: &str) -> Dependency {
        Dependency::new(from, to, DependencyType::Blocks, "t")
    }

    #[test]
    fn ready_excludes_blocked_and_close_unblocks() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("A").id("sk-a").priority(1).build(),
                "t",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("B").id("sk-b").priority(1).build(),
                "t",
            )
            .unwrap();
        store.add_dependency_impl(&blocks("sk-b", "sk-a"), "t").unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["sk-a"]);

        store.close_issue_impl("sk-a", "done", "t", "s").unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["sk-b"]);
    }

    #[test]
    fn ready_default_excludes_in_progress_and_closed() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("open").id("sk-o").build(), "t")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("started").id("sk-s").build(), "t")
            .unwrap();
        store.claim_issue_impl("sk-s", "bot").unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["sk-o"]);
    }

    #[test]
    fn cross_store_blockers_never_block() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("x").id("sk-x").build(), "t")
            .unwrap();
        store
            .add_dependency_impl(&blocks("sk-x", "external:up-77"), "t")
            .unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn ready_ordering_priority_pinned_updated_id() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("low").id("sk-low").priority(3).build(),
                "t",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("high").id("sk-high").priority(0).build(),
                "t",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("pinned")
                    .id("sk-pin")
                    .priority(3)
                    .pinned(true)
                    .build(),
                "t",
            )
            .unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["sk-high", "sk-pin", "sk-low"]);
    }

    #[test]
    fn ready_respects_limit_and_labels() {
        let store = test_store();
        for id in ["sk-1", "sk-2", "sk-3"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }
        store.add_label_impl("sk-2", "backend", "t").unwrap();

        let filter = WorkFilter {
            labels: vec!["backend".into()],
            ..Default::default()
        };
        let ready = store.get_ready_work_impl(&filter).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "sk-2");

        let filter = WorkFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(store.get_ready_work_impl(&filter).unwrap().len(), 2);
    }

    #[test]
    fn templates_and_ephemerals_excluded() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("tpl").id("sk-t").is_template(true).build(),
                "t",
            )
            .unwrap();
        store
            .create_issue_impl(
                &IssueBuilder::new("eph").id("sk-e").ephemeral(true).build(),
                "t",
            )
            .unwrap();

        assert!(store.get_ready_work_impl(&WorkFilter::default()).unwrap().is_empty());

        let filter = WorkFilter {
            include_ephemeral: true,
            ..Default::default()
        };
        let ready = store.get_ready_work_impl(&filter).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "sk-e");
    }

    #[test]
    fn blocked_carries_blockers() {
        let store = test_store();
        for id in ["sk-a", "sk-b", "sk-c"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }
        store.add_dependency_impl(&blocks("sk-c", "sk-a"), "t").unwrap();
        store
            .add_dependency_impl(
                &Dependency::new("sk-c", "sk-b", DependencyType::ParentChild, "t"),
                "t",
            )
            .unwrap();

        let blocked = store.get_blocked_impl(&WorkFilter::default()).unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].issue.id, "sk-c");
        let blocker_ids: Vec<&str> =
            blocked[0].blockers.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(blocker_ids, vec!["sk-a", "sk-b"]);
    }

    #[test]
    fn epic_progress_recursive() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("epic")
                    .id("sk-ep")
                    .issue_type(IssueType::Epic)
                    .build(),
                "t",
            )
            .unwrap();
        for id in ["sk-c1", "sk-c2", "sk-g1"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }
        // c1, c2 children of the epic; g1 grandchild under c1.
        for (child, parent) in [("sk-c1", "sk-ep"), ("sk-c2", "sk-ep"), ("sk-g1", "sk-c1")] {
            store
                .add_dependency_impl(
                    &Dependency::new(child, parent, DependencyType::ParentChild, "t"),
                    "t",
                )
                .unwrap();
        }

        let progress = store.get_epic_progress_impl("sk-ep").unwrap();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.open, 3);
        assert!(!progress.is_closeable());

        for id in ["sk-g1", "sk-c1", "sk-c2"] {
            store.close_issue_impl(id, "done", "t", "s").unwrap();
        }
        let progress = store.get_epic_progress_impl("sk-ep").unwrap();
        assert_eq!(progress.closed, 3);
        assert!(progress.is_closeable());

        let eligible = store.epics_eligible_for_closure_impl().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].epic_id, "sk-ep");
    }

    #[test]
    fn childless_epic_not_eligible() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("lonely")
                    .id("sk-ep2")
                    .issue_type(IssueType::Epic)
                    .build(),
                "t",
            )
            .unwrap();
        assert!(store.epics_eligible_for_closure_impl().unwrap().is_empty());
    }

    #[test]
    fn statistics_counts() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("a").id("sk-1").build(), "t")
            .unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("b").id("sk-2").build(), "t")
            .unwrap();
        store.close_issue_impl("sk-2", "done", "t", "s").unwrap();

        let stats = store.get_statistics_impl().unwrap();
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.closed_issues, 1);
        assert_eq!(stats.ready_issues, 1);
    }

    #[test]
    fn blocked_status_recovers_into_ready() {
        let store = test_store();
        store
            .create_issue_impl(
                &IssueBuilder::new("was blocked")
                    .id("sk-wb")
                    .status(Status::Blocked)
                    .build(),
                "t",
            )
            .unwrap();
        // Status says blocked but no edges: the default filter admits it.
        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        assert_eq!(ready.len(), 1);
    }
}
