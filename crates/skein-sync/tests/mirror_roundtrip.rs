//! End-to-end mirror behaviour: round-trip, idempotency, orphan handling,
//! three-way merge.

use std::path::Path;

use pretty_assertions::assert_eq;

use skein_core::cancel::CancelToken;
use skein_core::dependency::Dependency;
use skein_core::enums::{DependencyType, Status};
use skein_core::issue::{Issue, IssueBuilder};
use skein_storage::{SqliteStore, Storage, StorageError};
use skein_sync::{
    ExportOptions, ImportOptions, export_incremental, import_mirror, import_mirror_text,
    merge_mirrors,
};

fn export(store: &dyn Storage, path: &Path) {
    export_incremental(store, path, &ExportOptions::default(), &CancelToken::new()).unwrap();
}

fn import(store: &dyn Storage, path: &Path) {
    import_mirror(store, path, &ImportOptions::default(), &CancelToken::new()).unwrap();
}

fn populated_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();

    let epic = IssueBuilder::new("Build the importer")
        .id("sk-epic")
        .issue_type(skein_core::enums::IssueType::Epic)
        .priority(1)
        .build();
    store.create_issue(&epic, "alice").unwrap();

    let task = IssueBuilder::new("Parse the file")
        .id("sk-task")
        .priority(2)
        .description("line by line")
        .labels(vec!["parser".into()])
        .metadata_json(r#"{"sprint": 4}"#)
        .build();
    store.create_issue(&task, "alice").unwrap();
    store
        .add_dependency(
            &Dependency::new("sk-task", "sk-epic", DependencyType::ParentChild, "alice"),
            "alice",
        )
        .unwrap();
    store.add_comment("sk-task", "bob", "watch the BOM").unwrap();

    let done = IssueBuilder::new("Spike")
        .id("sk-done")
        .priority(3)
        .build();
    store.create_issue(&done, "alice").unwrap();
    store.close_issue("sk-done", "superseded", "alice", "s1").unwrap();

    store
}

/// Property: export then import into an empty store reproduces every
/// entity.
#[test]
fn export_import_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("issues.jsonl");

    let source = populated_store();
    export(&source, &path);

    let target = SqliteStore::open_in_memory().unwrap();
    import(&target, &path);

    let source_issues = source.get_all_issues_full().unwrap();
    let target_issues = target.get_all_issues_full().unwrap();
    assert_eq!(source_issues.len(), target_issues.len());

    for (a, b) in source_issues.iter().zip(&target_issues) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.title, b.title);
        assert_eq!(a.status, b.status);
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.updated_at.timestamp_millis(), b.updated_at.timestamp_millis());
        assert_eq!(
            a.dependencies.iter().map(|d| (&d.depends_on_id, &d.dep_type)).collect::<Vec<_>>(),
            b.dependencies.iter().map(|d| (&d.depends_on_id, &d.dep_type)).collect::<Vec<_>>(),
        );
        assert_eq!(
            a.comments.iter().map(|c| (&c.author, &c.text)).collect::<Vec<_>>(),
            b.comments.iter().map(|c| (&c.author, &c.text)).collect::<Vec<_>>(),
        );
        assert_eq!(
            a.metadata.as_ref().map(|m| m.get().to_string()),
            b.metadata.as_ref().map(|m| m.get().to_string()),
        );
    }

    let closed = target.get_issue("sk-done").unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert!(closed.closed_at.is_some());
}

/// Property: exporting twice without mutation leaves the bytes alone.
#[test]
fn export_twice_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("issues.jsonl");

    let store = populated_store();
    export(&store, &path);
    let first = std::fs::read(&path).unwrap();

    export(&store, &path);
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

/// A second round-trip of an imported store reproduces the same mirror.
#[test]
fn reexport_of_import_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let path_a = tmp.path().join("a.jsonl");
    let path_b = tmp.path().join("b.jsonl");

    let source = populated_store();
    export(&source, &path_a);

    let target = SqliteStore::open_in_memory().unwrap();
    import(&target, &path_a);
    target.mark_all_dirty().unwrap();
    export(&target, &path_b);

    let a = std::fs::read_to_string(&path_a).unwrap();
    let b = std::fs::read_to_string(&path_b).unwrap();
    let mut a_lines: Vec<&str> = a.lines().collect();
    let mut b_lines: Vec<&str> = b.lines().collect();
    a_lines.sort();
    b_lines.sort();
    assert_eq!(a_lines, b_lines);
}

/// A mirror edge referencing an issue nobody knows aborts a strict import.
#[test]
fn strict_import_aborts_on_orphans() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut record = IssueBuilder::new("dangling").id("sk-d").build();
    record
        .dependencies
        .push(Dependency::new("sk-d", "sk-z", DependencyType::Blocks, "t"));

    let mut text = skein_core::mirror::write_line(&record);
    text.push('\n');

    let err = import_mirror_text(
        &store,
        &text,
        &ImportOptions::default(),
        &CancelToken::new(),
    )
    .unwrap_err();
    match err {
        StorageError::OrphanParent { ids } => assert_eq!(ids, vec!["sk-z"]),
        other => panic!("expected OrphanParent, got {other:?}"),
    }
    assert!(store.get_all_issues_full().unwrap().is_empty());
}

/// Merge scenario: both branches touched the same record on different
/// fields; the merge keeps both changes and the newer timestamp.
#[test]
fn three_way_merge_combines_field_edits() {
    let t0: chrono::DateTime<chrono::Utc> = "2025-02-01T00:00:00Z".parse().unwrap();
    let t1 = t0 + chrono::Duration::hours(1);
    let t2 = t0 + chrono::Duration::hours(2);

    let base_issue: Issue = IssueBuilder::new("A")
        .id("sk-a")
        .priority(2)
        .created_at(t0)
        .updated_at(t0)
        .build();

    let mut left = base_issue.clone();
    left.priority = 0;
    left.updated_at = t1;

    let mut right = base_issue.clone();
    right.title = "A*".into();
    right.updated_at = t2;

    let line = |i: &Issue| {
        let mut s = skein_core::mirror::write_line(i);
        s.push('\n');
        s
    };

    let (merged, report) =
        merge_mirrors(&line(&base_issue), &line(&left), &line(&right)).unwrap();
    assert!(report.conflicts_resolved.is_empty());
    assert!(report.dropped_edges.is_empty());

    // The merged mirror imports cleanly and carries both edits.
    let store = SqliteStore::open_in_memory().unwrap();
    import_mirror_text(&store, &merged, &ImportOptions::default(), &CancelToken::new()).unwrap();
    let got = store.get_issue("sk-a").unwrap();
    assert_eq!(got.priority, 0);
    assert_eq!(got.title, "A*");
    assert_eq!(got.updated_at.timestamp_millis(), t2.timestamp_millis());
}

/// Deleting via the mirror requires delete_missing; plain import is
/// additive.
#[test]
fn deletion_requires_explicit_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("issues.jsonl");

    let store = populated_store();
    export(&store, &path);

    // Drop one line from the mirror.
    let text = std::fs::read_to_string(&path).unwrap();
    let pruned: String = text
        .lines()
        .filter(|l| !l.contains(r#""id":"sk-done""#))
        .map(|l| format!("{l}\n"))
        .collect();

    import_mirror_text(
        &store,
        &pruned,
        &ImportOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(store.get_issue("sk-done").is_ok());

    import_mirror_text(
        &store,
        &pruned,
        &ImportOptions {
            delete_missing: true,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .unwrap();
    assert!(store.get_issue("sk-done").is_err());
}
