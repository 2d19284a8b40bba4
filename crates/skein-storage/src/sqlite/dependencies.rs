//! Dependency edges: CRUD, cycle detection, traversal.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use skein_core::dependency::{Dependency, is_external_endpoint};
use skein_core::enums::{DependencyType, EventKind, READY_AFFECTING_TYPES_SQL};
use skein_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dirty;
use crate::sqlite::issues::{
    ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, get_issue_on_conn, scan_issue,
};
use crate::sqlite::store::SqliteStore;
use crate::traits::TreeNode;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

fn issue_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", params![id], |_| Ok(()))
        .is_ok())
}

/// Inserts one edge with duplicate and cycle checks.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    // Both endpoints must exist locally unless flagged cross-store.
    for endpoint in [&dep.issue_id, &dep.depends_on_id] {
        if !is_external_endpoint(endpoint) && !issue_exists(conn, endpoint)? {
            return Err(StorageError::not_found("issue", endpoint.clone()));
        }
    }

    let duplicate: bool = conn
        .query_row(
            "SELECT 1 FROM dependencies
             WHERE issue_id = ?1 AND depends_on_id = ?2 AND dep_type = ?3",
            params![dep.issue_id, dep.depends_on_id, dep.dep_type.as_str()],
            |_| Ok(()),
        )
        .is_ok();
    if duplicate {
        return Err(StorageError::DuplicateDependency {
            from: dep.issue_id.clone(),
            to: dep.depends_on_id.clone(),
            dep_type: dep.dep_type.as_str().to_string(),
        });
    }

    // Cross-store edges never participate in the ready graph, so they cannot
    // close a cycle.
    if dep.gates_readiness() {
        if let Some(path) = find_cycle_path(conn, &dep.issue_id, &dep.depends_on_id)? {
            return Err(StorageError::Cycle { path });
        }
    }

    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO dependencies (issue_id, depends_on_id, dep_type, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            format_datetime(&dep.created_at),
            dep.created_by,
        ],
    )?;

    emit_event(
        conn,
        &dep.issue_id,
        EventKind::DependencyAdded,
        actor,
        Some(&format!("{} {}", dep.dep_type.as_str(), dep.depends_on_id)),
        &now_str,
    )?;
    if !is_external_endpoint(&dep.issue_id) {
        dirty::mark_dirty_on_conn(conn, &dep.issue_id)?;
    }
    Ok(())
}

/// Removes every edge between a pair of issues.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        issue_id,
        EventKind::DependencyRemoved,
        actor,
        Some(depends_on_id),
        &now_str,
    )?;
    if !is_external_endpoint(issue_id) {
        dirty::mark_dirty_on_conn(conn, issue_id)?;
    }
    Ok(())
}

/// Raw outgoing edges of one issue, ordered for stable export.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, dep_type, created_at, created_by
         FROM dependencies WHERE issue_id = ?1
         ORDER BY depends_on_id ASC, dep_type ASC",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;
    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        dep_type: DependencyType::from(row.get::<_, String>("dep_type")?),
        created_at: crate::sqlite::issues::parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
    })
}

/// Replaces an issue's outgoing edge set: removes edges absent from `deps`,
/// then inserts the missing ones with the usual duplicate/cycle checks.
pub(crate) fn replace_dependencies_on_conn(
    conn: &Connection,
    issue_id: &str,
    deps: &[Dependency],
    actor: &str,
) -> Result<()> {
    let current = get_dependency_records_on_conn(conn, issue_id)?;

    let wanted: Vec<(String, String)> = deps
        .iter()
        .map(|d| (d.depends_on_id.clone(), d.dep_type.as_str().to_string()))
        .collect();

    for existing in &current {
        let key = (
            existing.depends_on_id.clone(),
            existing.dep_type.as_str().to_string(),
        );
        if !wanted.contains(&key) {
            conn.execute(
                "DELETE FROM dependencies
                 WHERE issue_id = ?1 AND depends_on_id = ?2 AND dep_type = ?3",
                params![issue_id, key.0, key.1],
            )?;
        }
    }

    for dep in deps {
        let already = current.iter().any(|e| {
            e.depends_on_id == dep.depends_on_id && e.dep_type == dep.dep_type
        });
        if already {
            continue;
        }
        let mut dep = dep.clone();
        dep.issue_id = issue_id.to_string();
        add_dependency_on_conn(conn, &dep, actor)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Would inserting `issue_id -> depends_on_id` close a cycle in the
/// ready-affecting graph?
///
/// BFS from `depends_on_id` with parent tracking; a hit on `issue_id` means
/// the new edge completes a loop. Returns the full cycle path starting and
/// ending at `issue_id`.
pub(crate) fn find_cycle_path(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
) -> Result<Option<Vec<String>>> {
    // Self-edge closes trivially.
    if issue_id == depends_on_id {
        return Ok(Some(vec![issue_id.to_string(), issue_id.to_string()]));
    }

    let mut parents: HashMap<String, String> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());
    visited.insert(depends_on_id.to_string());

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT depends_on_id FROM dependencies
         WHERE issue_id = ?1 AND dep_type IN {READY_AFFECTING_TYPES_SQL}"
    ))?;

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            // Reconstruct depends_on_id -> ... -> issue_id, then close the
            // loop with the proposed edge in front.
            let mut chain = vec![current.clone()];
            let mut cursor = current;
            while let Some(parent) = parents.get(&cursor) {
                chain.push(parent.clone());
                cursor = parent.clone();
            }
            chain.reverse();
            let mut path = Vec::with_capacity(chain.len() + 1);
            path.push(issue_id.to_string());
            path.extend(chain);
            return Ok(Some(path));
        }

        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if is_external_endpoint(&next) {
                continue;
            }
            if visited.insert(next.clone()) {
                parents.insert(next.clone(), current.clone());
                queue.push_back(next);
            }
        }
    }

    Ok(None)
}

/// Scans the whole ready-affecting graph for cycles.
///
/// Depth-first with an explicit stack; each cycle is reported once, as the
/// ids along it in traversal order (first element repeated at the end).
pub(crate) fn detect_cycles_on_conn(conn: &Connection) -> Result<Vec<Vec<String>>> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT issue_id, depends_on_id FROM dependencies
             WHERE dep_type IN {READY_AFFECTING_TYPES_SQL}
             ORDER BY issue_id ASC, depends_on_id ASC"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (from, to) = row?;
            if is_external_endpoint(&from) || is_external_endpoint(&to) {
                continue;
            }
            adjacency.entry(from).or_default().push(to);
        }
    }

    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();
    let mut done: HashSet<String> = HashSet::new();

    let mut roots: Vec<&String> = adjacency.keys().collect();
    roots.sort();

    for root in roots {
        if done.contains(root.as_str()) {
            continue;
        }
        // (node, next child index) frames.
        let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
        let mut on_stack: HashSet<String> = HashSet::new();
        on_stack.insert(root.clone());

        while let Some((node, child_idx)) = stack.last().cloned() {
            let children = adjacency.get(&node).cloned().unwrap_or_default();
            if child_idx >= children.len() {
                stack.pop();
                on_stack.remove(&node);
                done.insert(node);
                continue;
            }
            stack.last_mut().expect("frame").1 += 1;

            let next = &children[child_idx];
            if on_stack.contains(next) {
                // Back edge: slice the stack from `next` to here.
                let start = stack
                    .iter()
                    .position(|(n, _)| n == next)
                    .expect("on-stack node is in the stack");
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|(n, _)| n.clone()).collect();
                cycle.push(next.clone());

                // Canonical form for dedup: member set, order-insensitive.
                let mut key: Vec<String> = cycle[..cycle.len() - 1].to_vec();
                key.sort();
                if seen_cycles.insert(key) {
                    cycles.push(cycle);
                }
            } else if !done.contains(next.as_str()) {
                on_stack.insert(next.clone());
                stack.push((next.clone(), 0));
            }
        }
    }

    Ok(cycles)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor)
    }

    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor)
    }

    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1
             ORDER BY issues.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1
             ORDER BY issues.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    pub fn get_all_dependency_records_impl(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, dep_type, created_at, created_by
             FROM dependencies ORDER BY issue_id ASC, depends_on_id ASC",
        )?;
        let rows = stmt.query_map([], scan_dependency)?;
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for row in rows {
            let dep = row?;
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    pub fn get_dependency_tree_impl(
        &self,
        issue_id: &str,
        max_depth: i32,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;

        let root = get_issue_on_conn(&conn, issue_id)?;
        let mut result = vec![TreeNode {
            issue: root,
            depth: 0,
            dep_type: DependencyType::Blocks,
        }];
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(issue_id.to_string());
        let mut queue: VecDeque<(String, i32)> = VecDeque::new();
        queue.push_back((issue_id.to_string(), 0));

        let sql = if reverse {
            "SELECT issue_id, dep_type FROM dependencies WHERE depends_on_id = ?1
             ORDER BY issue_id ASC"
        } else {
            "SELECT depends_on_id, dep_type FROM dependencies WHERE issue_id = ?1
             ORDER BY depends_on_id ASC"
        };

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut stmt = conn.prepare_cached(sql)?;
            let edges: Vec<(String, String)> = stmt
                .query_map(params![current], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(std::result::Result::ok)
                .collect();

            for (next_id, dep_type_str) in edges {
                if !visited.insert(next_id.clone()) {
                    continue;
                }
                if is_external_endpoint(&next_id) {
                    continue;
                }
                if let Ok(issue) = get_issue_on_conn(&conn, &next_id) {
                    result.push(TreeNode {
                        issue,
                        depth: depth + 1,
                        dep_type: DependencyType::from(dep_type_str.as_str()),
                    });
                    queue.push_back((next_id, depth + 1));
                }
            }
        }

        Ok(result)
    }

    pub fn detect_cycles_impl(&self) -> Result<Vec<Vec<String>>> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        detect_cycles_on_conn(&conn)
    }
}
