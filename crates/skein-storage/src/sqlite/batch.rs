//! Batch operations: multi-issue create with orphan policy, and the delete
//! closure (cascade / force / dry-run).

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};

use skein_core::dependency::{Dependency, EXTERNAL_PREFIX, is_external_endpoint};
use skein_core::enums::EventKind;
use skein_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dependencies::detect_cycles_on_conn;
use crate::sqlite::issues::{delete_issue_on_conn, emit_event, format_datetime, insert_issue};
use crate::sqlite::store::SqliteStore;
use crate::traits::{CreateBatchOptions, DeleteOptions, DeleteOutcome, OrphanMode};

impl SqliteStore {
    /// All-or-nothing batch create.
    ///
    /// Issues land first, then their nested dependency edges (so in-batch
    /// references resolve), then one cycle validation over the whole graph.
    /// Any failure rolls the entire batch back.
    pub fn create_issues_impl(
        &self,
        issues: &[Issue],
        actor: &str,
        opts: &CreateBatchOptions,
    ) -> Result<()> {
        self.check_cancelled()?;
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        for issue in issues {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            insert_issue(&tx, issue, actor)?;
        }

        // Edges second: in-batch targets now exist.
        let mut missing: Vec<String> = Vec::new();
        let mut edges: Vec<Dependency> = Vec::new();
        for issue in issues {
            for dep in &issue.dependencies {
                let mut dep = dep.clone();
                dep.issue_id = issue.id.clone();
                let target_missing = !is_external_endpoint(&dep.depends_on_id)
                    && !issue_exists(&tx, &dep.depends_on_id)?;
                if target_missing {
                    match opts.orphan_mode {
                        OrphanMode::Strict => {
                            if !missing.contains(&dep.depends_on_id) {
                                missing.push(dep.depends_on_id.clone());
                            }
                            continue;
                        }
                        OrphanMode::Skip => {
                            tracing::warn!(
                                from = %dep.issue_id,
                                to = %dep.depends_on_id,
                                "dropping edge to missing issue"
                            );
                            continue;
                        }
                        OrphanMode::Allow => {
                            dep.depends_on_id =
                                format!("{EXTERNAL_PREFIX}{}", dep.depends_on_id);
                        }
                    }
                }
                edges.push(dep);
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(StorageError::OrphanParent { ids: missing });
        }

        let now_str = format_datetime(&Utc::now());
        for dep in &edges {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            tx.execute(
                "INSERT OR IGNORE INTO dependencies
                 (issue_id, depends_on_id, dep_type, created_at, created_by)
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
                &tx,
                &dep.issue_id,
                EventKind::DependencyAdded,
                actor,
                Some(&format!("{} {}", dep.dep_type.as_str(), dep.depends_on_id)),
                &now_str,
            )?;
        }

        // One validation pass over the candidate graph.
        let cycles = detect_cycles_on_conn(&tx)?;
        if let Some(path) = cycles.into_iter().next() {
            return Err(StorageError::Cycle { path });
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Computes and (unless `dry_run`) applies the delete closure.
    pub fn delete_issues_impl(
        &self,
        ids: &[String],
        opts: &DeleteOptions,
        actor: &str,
    ) -> Result<DeleteOutcome> {
        self.check_cancelled()?;
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        for id in ids {
            if !issue_exists(&tx, id)? {
                return Err(StorageError::not_found("issue", id.clone()));
            }
        }

        // The closure: requested ids, plus (under cascade) every
        // parent-child descendant, recursively.
        let mut doomed: HashSet<String> = ids.iter().cloned().collect();
        if opts.cascade {
            let mut queue: VecDeque<String> = ids.iter().cloned().collect();
            while let Some(current) = queue.pop_front() {
                if self.cancel.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                let mut stmt = tx.prepare_cached(
                    "SELECT issue_id FROM dependencies
                     WHERE depends_on_id = ?1 AND dep_type = 'parent-child'",
                )?;
                let children: Vec<String> = stmt
                    .query_map(params![current], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<_, _>>()?;
                for child in children {
                    if doomed.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
        }

        // Surviving dependents still pointing into the doomed set.
        let mut edges_removed: Vec<(String, String)> = Vec::new();
        let mut dependents: Vec<String> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT issue_id, depends_on_id FROM dependencies ORDER BY issue_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (from, to) = row?;
                if doomed.contains(&to) && !doomed.contains(&from) {
                    if opts.force {
                        edges_removed.push((from, to));
                    } else if !dependents.contains(&from) {
                        dependents.push(from);
                    }
                }
            }
        }
        if !dependents.is_empty() {
            dependents.sort();
            return Err(StorageError::HasDependents { ids: dependents });
        }

        let mut deleted: Vec<String> = doomed.into_iter().collect();
        deleted.sort();

        let outcome = DeleteOutcome {
            deleted: deleted.clone(),
            edges_removed: edges_removed.clone(),
        };
        if opts.dry_run {
            // Computed but not applied; the open transaction just unwinds.
            return Ok(outcome);
        }

        for (from, to) in &edges_removed {
            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
                params![from, to],
            )?;
        }

        let now_str = format_datetime(&Utc::now());
        for id in &deleted {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            delete_issue_on_conn(&tx, id)?;
            emit_event(&tx, id, EventKind::Deleted, actor, None, &now_str)?;
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(outcome)
    }
}

fn issue_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", params![id], |_| Ok(()))
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::enums::DependencyType;
    use skein_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn with_dep(id: &str, to: &str, dep_type: DependencyType) -> Issue {
        let mut issue = IssueBuilder::new("batch").id(id).build();
        issue.dependencies.push(Dependency::new(id, to, dep_type, "t"));
        issue
    }

    #[test]
    fn batch_create_resolves_in_batch_references() {
        let store = test_store();
        let batch = vec![
            IssueBuilder::new("parent").id("sk-p").build(),
            with_dep("sk-c", "sk-p", DependencyType::ParentChild),
        ];
        store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap();

        let deps = store.get_dependency_records_impl("sk-c").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on_id, "sk-p");
    }

    #[test]
    fn batch_strict_rejects_orphans_and_rolls_back() {
        let store = test_store();
        let batch = vec![with_dep("sk-c", "sk-ghost", DependencyType::Blocks)];
        let err = store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap_err();
        match err {
            StorageError::OrphanParent { ids } => assert_eq!(ids, vec!["sk-ghost"]),
            other => panic!("expected OrphanParent, got {other:?}"),
        }
        // Nothing committed.
        assert!(store.get_issue_impl("sk-c").is_err());
    }

    #[test]
    fn batch_skip_drops_orphan_edges() {
        let store = test_store();
        let batch = vec![with_dep("sk-c", "sk-ghost", DependencyType::Blocks)];
        store
            .create_issues_impl(
                &batch,
                "t",
                &CreateBatchOptions {
                    orphan_mode: OrphanMode::Skip,
                },
            )
            .unwrap();
        assert!(store.get_dependency_records_impl("sk-c").unwrap().is_empty());
    }

    #[test]
    fn batch_allow_flags_external() {
        let store = test_store();
        let batch = vec![with_dep("sk-c", "sk-ghost", DependencyType::Blocks)];
        store
            .create_issues_impl(
                &batch,
                "t",
                &CreateBatchOptions {
                    orphan_mode: OrphanMode::Allow,
                },
            )
            .unwrap();
        let deps = store.get_dependency_records_impl("sk-c").unwrap();
        assert_eq!(deps[0].depends_on_id, "external:sk-ghost");
    }

    #[test]
    fn batch_cycle_rolls_back_everything() {
        let store = test_store();
        let batch = vec![
            with_dep("sk-a", "sk-b", DependencyType::Blocks),
            with_dep("sk-b", "sk-a", DependencyType::Blocks),
        ];
        let err = store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::Cycle { .. }));
        assert!(store.get_issue_impl("sk-a").is_err());
        assert!(store.get_issue_impl("sk-b").is_err());
    }

    #[test]
    fn delete_refuses_dependents_without_force() {
        let store = test_store();
        let batch = vec![
            IssueBuilder::new("target").id("sk-t").build(),
            with_dep("sk-d", "sk-t", DependencyType::Blocks),
        ];
        store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap();

        let err = store
            .delete_issues_impl(
                &["sk-t".into()],
                &DeleteOptions::default(),
                "t",
            )
            .unwrap_err();
        match err {
            StorageError::HasDependents { ids } => assert_eq!(ids, vec!["sk-d"]),
            other => panic!("expected HasDependents, got {other:?}"),
        }
    }

    #[test]
    fn delete_force_orphans_dependents() {
        let store = test_store();
        let batch = vec![
            IssueBuilder::new("target").id("sk-t").build(),
            with_dep("sk-d", "sk-t", DependencyType::Blocks),
        ];
        store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap();

        let outcome = store
            .delete_issues_impl(
                &["sk-t".into()],
                &DeleteOptions {
                    force: true,
                    ..Default::default()
                },
                "t",
            )
            .unwrap();
        assert_eq!(outcome.deleted, vec!["sk-t"]);
        assert_eq!(outcome.edges_removed, vec![("sk-d".into(), "sk-t".into())]);

        assert!(store.get_issue_impl("sk-t").is_err());
        assert!(store.get_dependency_records_impl("sk-d").unwrap().is_empty());
    }

    #[test]
    fn delete_cascade_takes_descendants() {
        let store = test_store();
        let batch = vec![
            IssueBuilder::new("epic").id("sk-e").build(),
            with_dep("sk-c1", "sk-e", DependencyType::ParentChild),
            with_dep("sk-g1", "sk-c1", DependencyType::ParentChild),
        ];
        store
            .create_issues_impl(&batch, "t", &CreateBatchOptions::default())
            .unwrap();

        let outcome = store
            .delete_issues_impl(
                &["sk-e".into()],
                &DeleteOptions {
                    cascade: true,
                    ..Default::default()
                },
                "t",
            )
            .unwrap();
        assert_eq!(outcome.deleted, vec!["sk-c1", "sk-e", "sk-g1"]);
        assert!(store.get_issue_impl("sk-g1").is_err());
    }

    #[test]
    fn delete_dry_run_changes_nothing() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("x").id("sk-x").build(), "t")
            .unwrap();

        let outcome = store
            .delete_issues_impl(
                &["sk-x".into()],
                &DeleteOptions {
                    dry_run: true,
                    ..Default::default()
                },
                "t",
            )
            .unwrap();
        assert_eq!(outcome.deleted, vec!["sk-x"]);
        // Still there.
        store.get_issue_impl("sk-x").unwrap();
    }

    #[test]
    fn delete_missing_id_is_not_found() {
        let store = test_store();
        let err = store
            .delete_issues_impl(&["sk-ghost".into()], &DeleteOptions::default(), "t")
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
