//! Dependency-graph and ready-work behaviour, end to end against the
//! SQLite backend.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use skein_core::dependency::Dependency;
use skein_core::enums::{DependencyType, Status};
use skein_core::filter::WorkFilter;
use skein_core::issue::{Issue, IssueBuilder};
use skein_storage::{SqliteStore, Storage, StorageError};

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn issue(id: &str, title: &str, priority: i32) -> Issue {
    IssueBuilder::new(title).id(id).priority(priority).build()
}

fn blocks(from: &str, to: &str) -> Dependency {
    Dependency::new(from, to, DependencyType::Blocks, "test")
}

fn ready_ids(store: &dyn Storage) -> Vec<String> {
    store
        .get_ready_work(&WorkFilter::default())
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect()
}

/// Create, block, ready: closing the blocker surfaces the blocked issue.
#[test]
fn create_block_ready_close_cycle() {
    let store = store();
    store.create_issue(&issue("sk-a", "A", 1), "test").unwrap();
    store.create_issue(&issue("sk-b", "B", 1), "test").unwrap();
    store.add_dependency(&blocks("sk-b", "sk-a"), "test").unwrap();

    assert_eq!(ready_ids(&store), vec!["sk-a"]);

    store.close_issue("sk-a", "done", "test", "s1").unwrap();
    assert_eq!(ready_ids(&store), vec!["sk-b"]);
}

/// Adding an edge that closes a loop fails with the full cycle path and
/// leaves the store untouched.
#[test]
fn cycle_rejected_with_traversal_path() {
    let store = store();
    for id in ["sk-a", "sk-b", "sk-c"] {
        store.create_issue(&issue(id, "n", 2), "test").unwrap();
    }
    store.add_dependency(&blocks("sk-a", "sk-b"), "test").unwrap();
    store.add_dependency(&blocks("sk-b", "sk-c"), "test").unwrap();

    let err = store
        .add_dependency(&blocks("sk-c", "sk-a"), "test")
        .unwrap_err();
    match err {
        StorageError::Cycle { path } => {
            assert_eq!(path, vec!["sk-c", "sk-a", "sk-b", "sk-c"]);
        }
        other => panic!("expected Cycle, got {other:?}"),
    }
    assert!(store.get_dependency_records("sk-c").unwrap().is_empty());
    assert!(store.detect_cycles().unwrap().is_empty());
}

/// Closing any issue never shrinks the ready set (modulo the closed issue
/// itself).
#[test]
fn ready_set_is_monotonic_under_close() {
    // A small diamond plus a straggler; one fresh copy per victim.
    let all_ids = ["sk-1", "sk-2", "sk-3", "sk-4", "sk-5"];
    let build = || {
        let s = SqliteStore::open_in_memory().unwrap();
        for id in all_ids {
            s.create_issue(&issue(id, "n", 2), "test").unwrap();
        }
        s.add_dependency(&blocks("sk-2", "sk-1"), "test").unwrap();
        s.add_dependency(&blocks("sk-3", "sk-1"), "test").unwrap();
        s.add_dependency(&blocks("sk-4", "sk-2"), "test").unwrap();
        s.add_dependency(&blocks("sk-4", "sk-3"), "test").unwrap();
        s
    };

    for victim in all_ids {
        let store = build();

        let before = ready_ids(&store);
        store.close_issue(victim, "done", "test", "s").unwrap();
        let after = ready_ids(&store);

        for id in &before {
            if id != victim {
                assert!(
                    after.contains(id),
                    "closing {victim} removed {id} from the ready set"
                );
            }
        }
    }
}

/// At most one concurrent claim succeeds; the rest observe AlreadyClaimed.
#[test]
fn claim_is_exclusive_across_threads() {
    let store = Arc::new(store());
    store
        .create_issue(&issue("sk-race", "contended", 1), "test")
        .unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    let already = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&store);
        let wins = Arc::clone(&wins);
        let already = Arc::clone(&already);
        handles.push(std::thread::spawn(move || {
            match store.claim_issue("sk-race", &format!("bot-{n}")) {
                Ok(()) => {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
                Err(StorageError::AlreadyClaimed { .. }) => {
                    already.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected claim error: {other:?}"),
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(already.load(Ordering::SeqCst), 7);

    let claimed = store.get_issue("sk-race").unwrap();
    assert_eq!(claimed.status, Status::InProgress);
    assert!(!claimed.assignee.is_empty());
}

/// Writers queue behind `BEGIN IMMEDIATE` transactions; reads inside a
/// transaction see its own writes.
#[test]
fn transaction_isolation_and_rollback() {
    let store = store();
    let result = store.run_in_transaction(&|tx| {
        tx.create_issue(&issue("sk-t1", "inside", 2), "test")?;
        assert_eq!(tx.get_issue("sk-t1")?.title, "inside");
        Err(StorageError::invalid("unwind"))
    });
    assert!(result.is_err());
    assert!(store.get_issue("sk-t1").is_err());
}

/// Gates block like any other ready-affecting dependency until closed.
#[test]
fn gate_parks_downstream_work() {
    let store = store();
    let mut gate = IssueBuilder::new("Approve rollout")
        .id("sk-gate")
        .issue_type(skein_core::enums::IssueType::Gate)
        .build();
    gate.decision = Some(skein_core::decision::DecisionPoint {
        prompt: "Ship?".into(),
        options: vec![skein_core::decision::DecisionOption {
            id: "yes".into(),
            short: "y".into(),
            label: "Yes".into(),
            description: String::new(),
        }],
        default_option: "yes".into(),
        iteration: 1,
        max_iterations: 1,
        prior_id: None,
        guidance: String::new(),
        selected_option: None,
        response_text: String::new(),
        responded_at: None,
        responded_by: String::new(),
    });
    store.create_issue(&gate, "test").unwrap();
    store.create_issue(&issue("sk-work", "deploy", 1), "test").unwrap();
    store
        .add_dependency(&blocks("sk-work", "sk-gate"), "test")
        .unwrap();

    assert_eq!(ready_ids(&store), vec!["sk-gate"]);

    // Answering and closing the gate releases the work.
    store
        .close_issue("sk-gate", "approved: yes", "human", "s")
        .unwrap();
    assert_eq!(ready_ids(&store), vec!["sk-work"]);

    let stored_gate = store.get_issue_full("sk-gate").unwrap();
    assert!(stored_gate.decision.is_some());
}
