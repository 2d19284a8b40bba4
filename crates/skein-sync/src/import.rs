//! Import: mirror -> store.
//!
//! Issues land first (so edges can resolve), then each created or updated
//! record's edge set replaces what the store had. The whole import runs in
//! one transaction: a strict-mode orphan or a cycle rolls everything back.

use std::collections::{HashMap, HashSet};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use skein_config::OrphanPolicy;
use skein_core::cancel::CancelToken;
use skein_core::dependency::{Dependency, EXTERNAL_PREFIX, is_external_endpoint};
use skein_core::issue::Issue;
use skein_core::mirror::{self, MirrorRecord};
use skein_storage::{Result, Storage, StorageError, UpsertAction};

/// Import tuning.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub orphan_policy: OrphanPolicy,
    /// Delete store issues absent from the mirror. Without it, import is
    /// strictly additive.
    pub delete_missing: bool,
    /// Where to find the previously committed mirror for `resurrect`:
    /// repository root and the mirror's path relative to it.
    pub resurrect_source: Option<(PathBuf, String)>,
    /// Actor recorded on import events.
    pub actor: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::Strict,
            delete_missing: false,
            resurrect_source: None,
            actor: "import".to_string(),
        }
    }
}

/// What an import did.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub deleted: Vec<String>,
    /// Edges dropped under the `skip` policy: `(from, to)`.
    pub skipped_edges: Vec<(String, String)>,
    /// Issues pulled back from the committed mirror under `resurrect`.
    pub resurrected: Vec<String>,
}

/// Imports the mirror file into the store.
pub fn import_mirror(
    store: &dyn Storage,
    mirror_path: &Path,
    opts: &ImportOptions,
    cancel: &CancelToken,
) -> Result<ImportOutcome> {
    let text = crate::export::read_mirror_text(mirror_path)?;
    import_mirror_text(store, &text, opts, cancel)
}

/// Imports mirror content already in memory (merge results, tests).
pub fn import_mirror_text(
    store: &dyn Storage,
    text: &str,
    opts: &ImportOptions,
    cancel: &CancelToken,
) -> Result<ImportOutcome> {
    let reader = BufReader::new(text.as_bytes());
    let mut records: Vec<MirrorRecord> = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut conflicting: Vec<String> = Vec::new();
    for item in mirror::read_records(reader) {
        let (_, record) = item.map_err(|e| StorageError::invalid(e.to_string()))?;
        let rendered = serde_json::to_string(&record)?;
        match seen.get(&record.id) {
            // The same id twice with different content is an unreconciled
            // mirror (a hand-merge gone wrong); identical duplicates are
            // harmless and collapse.
            Some(prior) if *prior != rendered => {
                if !conflicting.contains(&record.id) {
                    conflicting.push(record.id.clone());
                }
            }
            Some(_) => {}
            None => {
                seen.insert(record.id.clone(), rendered);
                records.push(record);
            }
        }
    }
    if !conflicting.is_empty() {
        conflicting.sort();
        return Err(StorageError::MirrorConflict { ids: conflicting });
    }
    info!(records = records.len(), "importing mirror");

    let mut issues: Vec<Issue> = records.into_iter().map(MirrorRecord::into_issue).collect();

    // Resurrect pass: pull referenced-but-missing issues out of the last
    // committed mirror before the transactional import begins.
    let resurrected = if opts.orphan_policy == OrphanPolicy::Resurrect {
        resurrect_missing(store, &mut issues, opts)?
    } else {
        Vec::new()
    };

    let mirror_ids: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();

    // `run_in_transaction` takes `&dyn Fn`, so results leave the closure
    // through a cell.
    let collected: Mutex<ImportOutcome> = Mutex::new(ImportOutcome::default());

    store.run_in_transaction(&|tx| {
        let mut out = ImportOutcome::default();

        // Pass 1: issues.
        let mut actions: HashMap<String, UpsertAction> = HashMap::new();
        for issue in &issues {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            // The upsert hashes the whole record (edges included) but only
            // persists scalar fields, labels, comments and the decision;
            // edges land in pass 2.
            let action = tx.upsert_issue(issue, &opts.actor)?;
            actions.insert(issue.id.clone(), action);
            match action {
                UpsertAction::Created => out.created.push(issue.id.clone()),
                UpsertAction::Updated => out.updated.push(issue.id.clone()),
                UpsertAction::Unchanged => out.unchanged += 1,
            }
        }

        let store_ids: HashSet<String> = tx.list_issue_ids()?.into_iter().collect();

        // Pass 2: edges, for records the mirror is authoritative about.
        let mut missing: Vec<String> = Vec::new();
        for issue in &issues {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            if actions.get(&issue.id) == Some(&UpsertAction::Unchanged) {
                continue;
            }

            let mut deps: Vec<Dependency> = Vec::new();
            for dep in &issue.dependencies {
                let mut dep = dep.clone();
                let target_known = is_external_endpoint(&dep.depends_on_id)
                    || store_ids.contains(&dep.depends_on_id);
                if !target_known {
                    match opts.orphan_policy {
                        OrphanPolicy::Strict | OrphanPolicy::Resurrect => {
                            if !missing.contains(&dep.depends_on_id) {
                                missing.push(dep.depends_on_id.clone());
                            }
                            continue;
                        }
                        OrphanPolicy::Skip => {
                            warn!(
                                from = %dep.issue_id,
                                to = %dep.depends_on_id,
                                "dropping edge to missing issue"
                            );
                            out.skipped_edges
                                .push((dep.issue_id.clone(), dep.depends_on_id.clone()));
                            continue;
                        }
                        OrphanPolicy::Allow => {
                            dep.depends_on_id =
                                format!("{EXTERNAL_PREFIX}{}", dep.depends_on_id);
                        }
                    }
                }
                deps.push(dep);
            }
            if missing.is_empty() {
                tx.replace_dependencies(&issue.id, &deps, &opts.actor)?;
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(StorageError::OrphanParent { ids: missing });
        }

        // Deletion pass, only when explicitly requested.
        if opts.delete_missing {
            for id in store_ids {
                if !mirror_ids.contains(&id) {
                    tx.delete_issue(&id)?;
                    out.deleted.push(id);
                }
            }
            out.deleted.sort();
        }

        *collected.lock().expect("import outcome mutex") = out;
        Ok(())
    })?;

    let mut outcome = collected.into_inner().expect("import outcome mutex");
    outcome.resurrected = resurrected;

    info!(
        created = outcome.created.len(),
        updated = outcome.updated.len(),
        unchanged = outcome.unchanged,
        deleted = outcome.deleted.len(),
        "import complete"
    );
    Ok(outcome)
}

/// Pulls issues referenced by the mirror but present nowhere out of the
/// last committed mirror. Returns the resurrected ids.
fn resurrect_missing(
    store: &dyn Storage,
    issues: &mut Vec<Issue>,
    opts: &ImportOptions,
) -> Result<Vec<String>> {
    let Some((ref repo_root, ref rel_path)) = opts.resurrect_source else {
        return Ok(Vec::new());
    };

    let known: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();
    let mut wanted: Vec<String> = Vec::new();
    for issue in issues.iter() {
        for dep in &issue.dependencies {
            let target = &dep.depends_on_id;
            if is_external_endpoint(target) || known.contains(target) {
                continue;
            }
            if store.get_issue(target).is_ok() {
                continue;
            }
            if !wanted.contains(target) {
                wanted.push(target.clone());
            }
        }
    }
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let prior_text = match skein_git::show_head(repo_root, rel_path) {
        Ok(text) => text,
        Err(e) => {
            // No committed history to dig in: fall through to strict.
            warn!(error = %e, "resurrect unavailable, falling back to strict");
            return Ok(Vec::new());
        }
    };

    let reader = BufReader::new(prior_text.as_bytes());
    let mut resurrected = Vec::new();
    for item in mirror::read_records(reader) {
        let (_, record) = item.map_err(|e| StorageError::invalid(e.to_string()))?;
        if wanted.contains(&record.id) {
            info!(id = %record.id, "resurrecting issue from committed mirror");
            resurrected.push(record.id.clone());
            issues.push(record.into_issue());
        }
    }
    Ok(resurrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::enums::DependencyType;
    use skein_core::issue::IssueBuilder;
    use skein_storage::SqliteStore;

    fn line(issue: &Issue) -> String {
        let mut text = mirror::write_line(issue);
        text.push('\n');
        text
    }

    fn import(store: &SqliteStore, text: &str, opts: &ImportOptions) -> Result<ImportOutcome> {
        import_mirror_text(store, text, opts, &CancelToken::new())
    }

    #[test]
    fn creates_missing_issues_and_edges() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("A").id("sk-a").priority(1).build();
        let mut b = IssueBuilder::new("B").id("sk-b").priority(1).build();
        b.dependencies
            .push(Dependency::new("sk-b", "sk-a", DependencyType::Blocks, "t"));

        let text = format!("{}{}", line(&a), line(&b));
        let outcome = import(&store, &text, &ImportOptions::default()).unwrap();
        assert_eq!(outcome.created, vec!["sk-a", "sk-b"]);

        let deps = store.get_dependency_records_impl("sk-b").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on_id, "sk-a");
    }

    #[test]
    fn unchanged_records_are_noops() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("A").id("sk-a").build();
        let text = line(&a);

        let first = import(&store, &text, &ImportOptions::default()).unwrap();
        assert_eq!(first.created.len(), 1);

        let second = import(&store, &text, &ImportOptions::default()).unwrap();
        assert!(second.created.is_empty());
        assert!(second.updated.is_empty());
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn newer_record_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("A").id("sk-a").build();
        import(&store, &line(&a), &ImportOptions::default()).unwrap();

        let mut newer = a.clone();
        newer.title = "A revised".into();
        newer.updated_at = a.updated_at + chrono::Duration::hours(1);
        let outcome = import(&store, &line(&newer), &ImportOptions::default()).unwrap();
        assert_eq!(outcome.updated, vec!["sk-a"]);

        let got = store.get_issue_impl("sk-a").unwrap();
        assert_eq!(got.title, "A revised");
        // Imported timestamps are preserved, not bumped.
        assert_eq!(
            got.updated_at.timestamp_millis(),
            newer.updated_at.timestamp_millis()
        );
    }

    #[test]
    fn strict_orphan_aborts_whole_import() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut b = IssueBuilder::new("B").id("sk-b").build();
        b.dependencies
            .push(Dependency::new("sk-b", "sk-z", DependencyType::Blocks, "t"));

        let err = import(&store, &line(&b), &ImportOptions::default()).unwrap_err();
        match err {
            StorageError::OrphanParent { ids } => assert_eq!(ids, vec!["sk-z"]),
            other => panic!("expected OrphanParent, got {other:?}"),
        }
        // Store unchanged: even the issue insert rolled back.
        assert!(store.get_issue_impl("sk-b").is_err());
    }

    #[test]
    fn skip_policy_drops_edge_keeps_issue() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut b = IssueBuilder::new("B").id("sk-b").build();
        b.dependencies
            .push(Dependency::new("sk-b", "sk-z", DependencyType::Blocks, "t"));

        let opts = ImportOptions {
            orphan_policy: OrphanPolicy::Skip,
            ..Default::default()
        };
        let outcome = import(&store, &line(&b), &opts).unwrap();
        assert_eq!(outcome.skipped_edges, vec![("sk-b".into(), "sk-z".into())]);
        assert!(store.get_dependency_records_impl("sk-b").unwrap().is_empty());
        store.get_issue_impl("sk-b").unwrap();
    }

    #[test]
    fn allow_policy_flags_external() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut b = IssueBuilder::new("B").id("sk-b").build();
        b.dependencies
            .push(Dependency::new("sk-b", "sk-z", DependencyType::Blocks, "t"));

        let opts = ImportOptions {
            orphan_policy: OrphanPolicy::Allow,
            ..Default::default()
        };
        import(&store, &line(&b), &opts).unwrap();
        let deps = store.get_dependency_records_impl("sk-b").unwrap();
        assert_eq!(deps[0].depends_on_id, "external:sk-z");
    }

    #[test]
    fn delete_missing_removes_absent_issues() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["sk-a", "sk-b"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }

        let a = store.get_issue_full_impl("sk-a").unwrap();
        let opts = ImportOptions {
            delete_missing: true,
            ..Default::default()
        };
        let outcome = import(&store, &line(&a), &opts).unwrap();
        assert_eq!(outcome.deleted, vec!["sk-b"]);
        assert!(store.get_issue_impl("sk-b").is_err());
        store.get_issue_impl("sk-a").unwrap();
    }

    #[test]
    fn without_delete_missing_import_is_additive() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("keep").id("sk-keep").build(), "t")
            .unwrap();

        let a = IssueBuilder::new("A").id("sk-a").build();
        import(&store, &line(&a), &ImportOptions::default()).unwrap();
        store.get_issue_impl("sk-keep").unwrap();
        store.get_issue_impl("sk-a").unwrap();
    }

    #[test]
    fn divergent_duplicate_ids_are_a_mirror_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("one").id("sk-a").build();
        let mut a2 = a.clone();
        a2.title = "other".into();

        let text = format!("{}{}", line(&a), line(&a2));
        let err = import(&store, &text, &ImportOptions::default()).unwrap_err();
        match err {
            StorageError::MirrorConflict { ids } => assert_eq!(ids, vec!["sk-a"]),
            other => panic!("expected MirrorConflict, got {other:?}"),
        }

        // Byte-identical duplicates collapse silently.
        let text = format!("{}{}", line(&a), line(&a));
        let outcome = import(&store, &text, &ImportOptions::default()).unwrap();
        assert_eq!(outcome.created, vec!["sk-a"]);
    }

    #[test]
    fn imported_state_is_not_re_exported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("A").id("sk-a").build();
        import(&store, &line(&a), &ImportOptions::default()).unwrap();
        assert!(store.get_dirty_issues_impl().unwrap().is_empty());
    }
}
