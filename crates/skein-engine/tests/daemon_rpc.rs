//! Daemon round-trip: a served store answers clients over the socket, and
//! a second daemon is refused.

#![cfg(unix)]

use std::time::{Duration, Instant};

use skein_config::{Config, StoreDir};
use skein_core::cancel::CancelToken;
use skein_core::issue::IssueBuilder;
use skein_engine::client::DaemonClient;
use skein_engine::daemon::Daemon;
use skein_engine::{Engine, Request, Response};

fn wait_for_socket(store_dir: &StoreDir) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !store_dir.daemon_socket_path().exists() {
        assert!(Instant::now() < deadline, "daemon socket never appeared");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn daemon_serves_ready_claim_and_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::init(tmp.path(), Config::default()).unwrap();
    let issue = engine
        .create_issue(IssueBuilder::new("served work").priority(1).build(), None, "t")
        .unwrap();
    let store_dir = engine.store_dir().clone();

    let cancel = CancelToken::new();
    let daemon = Daemon::bind(engine).unwrap();
    let serve_cancel = cancel.clone();
    let server = std::thread::spawn(move || daemon.serve(&serve_cancel));

    wait_for_socket(&store_dir);
    let mut client = DaemonClient::connect_required(&store_dir).unwrap();

    // Ping.
    match client.call_ok(&Request::Ping).unwrap() {
        Response::Pong { version, pid } => {
            assert!(!version.is_empty());
            assert_eq!(pid, std::process::id());
        }
        other => panic!("expected Pong, got {other:?}"),
    }

    // Ready shows the seeded issue.
    match client.call_ok(&Request::Ready { limit: None }).unwrap() {
        Response::Issues { issues } => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].id, issue.id);
        }
        other => panic!("expected Issues, got {other:?}"),
    }

    // Claim it; a second claim surfaces the typed error across the wire.
    client
        .call_ok(&Request::Claim {
            id: issue.id.clone(),
            actor: "bot-1".into(),
        })
        .unwrap();
    let err = client
        .call_ok(&Request::Claim {
            id: issue.id.clone(),
            actor: "bot-2".into(),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "AlreadyClaimed");

    // Missing issues come back NotFound.
    let err = client
        .call_ok(&Request::GetIssue {
            id: "sk-ghost".into(),
        })
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");

    // Shutdown stops the serve loop.
    client.call_ok(&Request::Shutdown).unwrap();
    server.join().unwrap().unwrap();
    assert!(!store_dir.daemon_socket_path().exists());
}

#[test]
fn second_daemon_is_refused_while_first_lives() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::init(tmp.path(), Config::default()).unwrap();
    let store_dir = engine.store_dir().clone();

    let cancel = CancelToken::new();
    let daemon = Daemon::bind(engine).unwrap();
    let serve_cancel = cancel.clone();
    let server = std::thread::spawn(move || daemon.serve(&serve_cancel));
    wait_for_socket(&store_dir);

    // The daemon holds the engine's exclusive fence AND the daemon lock; a
    // second daemon cannot even open the store.
    let err = Engine::open(tmp.path(), skein_engine::LockMode::Exclusive).unwrap_err();
    assert_eq!(err.kind(), "LockBusy");

    let mut client = DaemonClient::connect_required(&store_dir).unwrap();
    client.call_ok(&Request::Shutdown).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn no_daemon_means_quiet_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::init(tmp.path(), Config::default()).unwrap();
    let store_dir = engine.store_dir().clone();
    drop(engine);

    // Absent daemon: connect() says "go direct", connect_required errors.
    assert!(DaemonClient::connect(&store_dir).unwrap().is_none());
    let err = DaemonClient::connect_required(&store_dir).unwrap_err();
    assert_eq!(err.kind(), "DaemonUnavailable");
}
