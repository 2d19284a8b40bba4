//! Compiled queries against a real SQLite store: the lowered filter plus
//! the residual predicate must agree with plain AST evaluation.

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;

use skein_core::enums::Status;
use skein_core::issue::{Issue, IssueBuilder};
use skein_query::{CompileContext, compile, eval, parse};
use skein_storage::{SqliteStore, Storage};

fn now() -> DateTime<Utc> {
    "2025-06-15T12:00:00Z".parse().unwrap()
}

fn seed(store: &SqliteStore) -> Vec<Issue> {
    let mut closed = IssueBuilder::new("shipped thing")
        .id("sk-q1")
        .priority(1)
        .created_at("2025-06-01T00:00:00Z".parse().unwrap())
        .updated_at("2025-06-01T00:00:00Z".parse().unwrap())
        .build();
    closed.status = Status::Closed;
    closed.closed_at = Some("2025-06-01T00:00:00Z".parse().unwrap());

    let issues = vec![
        closed,
        IssueBuilder::new("urgent fix")
            .id("sk-q2")
            .priority(0)
            .labels(vec!["x".into()])
            .created_at("2025-06-10T00:00:00Z".parse().unwrap())
            .updated_at("2025-06-14T00:00:00Z".parse().unwrap())
            .build(),
        IssueBuilder::new("slow burn")
            .id("sk-q3")
            .priority(3)
            .labels(vec!["y".into()])
            .assignee("bot-2")
            .metadata_json(r#"{"sprint": 7}"#)
            .created_at("2025-05-01T00:00:00Z".parse().unwrap())
            .updated_at("2025-05-02T00:00:00Z".parse().unwrap())
            .build(),
        IssueBuilder::new("mid task")
            .id("sk-q4")
            .priority(2)
            .labels(vec!["x".into(), "y".into()])
            .created_at("2025-06-12T00:00:00Z".parse().unwrap())
            .updated_at("2025-06-13T00:00:00Z".parse().unwrap())
            .build(),
    ];
    for issue in &issues {
        store.create_issue(issue, "t").unwrap();
    }
    issues
}

/// Runs a compiled query the way the facade does: SQL filter, then the
/// predicate over hydrated rows.
fn run_query(store: &SqliteStore, query: &str) -> Vec<String> {
    let ctx = CompileContext::at(now());
    let compiled = compile(query, &ctx).unwrap();
    let rows = store.search_issues("", &compiled.filter).unwrap();
    let mut out = Vec::new();
    for row in rows {
        let full = store.get_issue_full(&row.id).unwrap();
        if compiled.admits(&full) {
            out.push(full.id);
        }
    }
    out.sort();
    out
}

fn run_reference(store: &SqliteStore, query: &str) -> Vec<String> {
    let expr = parse(query).unwrap();
    let mut out: Vec<String> = store
        .get_all_issues_full()
        .unwrap()
        .into_iter()
        .filter(|issue| eval(&expr, issue, now()))
        .map(|issue| issue.id)
        .collect();
    out.sort();
    out
}

#[test]
fn pushdown_agrees_with_reference_semantics() {
    let store = SqliteStore::open_in_memory().unwrap();
    seed(&store);

    let queries = [
        // Filter-only shapes.
        "status = open AND priority <= 1",
        "label = x OR label = y",
        "NOT status = closed",
        "priority >= 1 AND priority < 4",
        "updated < 7d",
        "updated > 7d",
        "assignee = bot-2",
        // Predicate shapes.
        "status = open OR priority > 1",
        "metadata.sprint = 7",
        "status = open AND metadata.sprint >= 5",
        "NOT (label = x AND priority = 2)",
        "label != x",
    ];

    for query in queries {
        assert_eq!(
            run_query(&store, query),
            run_reference(&store, query),
            "pushdown disagrees with reference for '{query}'"
        );
    }
}

#[test]
fn filter_only_conjunction_matches_expected_rows() {
    // A conjunction of simple comparisons lowers to a pure filter and
    // returns exactly the status/priority matches.
    let store = SqliteStore::open_in_memory().unwrap();
    seed(&store);

    let ctx = CompileContext::at(now());
    let compiled = compile("status = open AND priority <= 1", &ctx).unwrap();
    assert!(compiled.is_filter_only());

    let rows = store.search_issues("", &compiled.filter).unwrap();
    let ids: Vec<&str> = rows.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["sk-q2"]);
}

#[test]
fn label_union_runs_as_one_filter() {
    // A pure label OR becomes labels_any: no predicate, no per-row work.
    let store = SqliteStore::open_in_memory().unwrap();
    seed(&store);

    let ctx = CompileContext::at(now());
    let compiled = compile("label = x OR label = y", &ctx).unwrap();
    assert!(compiled.is_filter_only());
    assert_eq!(compiled.filter.labels_any, vec!["x", "y"]);

    let rows = store.search_issues("", &compiled.filter).unwrap();
    let mut ids: Vec<&str> = rows.iter().map(|i| i.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["sk-q2", "sk-q3", "sk-q4"]);
}

#[test]
fn mixed_or_overapproximates_then_filters() {
    // A mixed OR keeps an over-approximating base filter that admits more
    // rows than match; the predicate prunes them.
    let store = SqliteStore::open_in_memory().unwrap();
    seed(&store);

    let ctx = CompileContext::at(now());
    let compiled = compile("status = open OR priority > 1", &ctx).unwrap();
    assert!(!compiled.is_filter_only());

    let candidates = store.search_issues("", &compiled.filter).unwrap();
    let matched: Vec<&str> = candidates
        .iter()
        .filter(|i| compiled.admits(i))
        .map(|i| i.id.as_str())
        .collect();
    // sk-q1 is closed with priority 1: the only non-match.
    assert_eq!(candidates.len(), 4);
    assert_eq!(matched.len(), 3);
    assert!(!matched.contains(&"sk-q1"));
}
