//! Watch session behavior against a real filesystem
//!
//! These tests start real OS watchers, so they run on the multi-thread
//! runtime and wait with bounded timeouts.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{drain, wait_for, write_file, TestWorkspace, EVENT_TIMEOUT};
use workspace_hub::config::WatcherConfig;
use workspace_hub::server::{FileEventKind, Listener, WatchSession};

fn started_session(ws: &TestWorkspace, name: &str) -> WatchSession {
    let session = WatchSession::new(ws.root(name), WatcherConfig::default());
    session.start().expect("session should start");
    session
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_reaches_every_listener_once() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");

    let (first, mut first_inbox) = Listener::channel(64);
    let (second, mut second_inbox) = Listener::channel(64);
    session.add_listener(first);
    session.add_listener(second);

    write_file(session.root(), "a.txt", "hello");

    for inbox in [&mut first_inbox, &mut second_inbox] {
        let mut seen = wait_for(inbox, FileEventKind::Created, "a.txt").await;
        seen.extend(drain(inbox).await);

        let created: Vec<_> = seen
            .iter()
            .filter(|e| e.kind == FileEventKind::Created)
            .collect();
        assert_eq!(created.len(), 1, "events: {:?}", seen);
        assert_eq!(created[0].path, "a.txt");
        assert!(!created[0].is_directory);
    }

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_reports_destination() {
    let ws = TestWorkspace::new();
    let root = ws.root("alice");
    write_file(&root, "a.txt", "hello");

    let session = WatchSession::new(&root, WatcherConfig::default());
    let (listener, mut inbox) = Listener::channel(64);
    session.add_listener(listener);
    session.start().unwrap();

    std::fs::rename(root.join("a.txt"), root.join("b.txt")).unwrap();

    let mut seen = wait_for(&mut inbox, FileEventKind::Moved, "b.txt").await;
    seen.extend(drain(&mut inbox).await);
    let moves = seen
        .iter()
        .filter(|e| e.kind == FileEventKind::Moved)
        .count();
    assert_eq!(moves, 1, "events: {:?}", seen);
    assert!(
        !seen.iter().any(|e| e.kind == FileEventKind::Deleted),
        "rename inside the workspace is not a delete: {:?}",
        seen
    );

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nested_directories_and_delete() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");
    let (listener, mut inbox) = Listener::channel(64);
    session.add_listener(listener);

    std::fs::create_dir(session.root().join("docs")).unwrap();
    let seen = wait_for(&mut inbox, FileEventKind::Created, "docs").await;
    assert!(seen.last().unwrap().is_directory);

    // Give the recursive watch time to cover the new directory
    tokio::time::sleep(Duration::from_millis(200)).await;
    write_file(session.root(), "docs/x.md", "# x");
    wait_for(&mut inbox, FileEventKind::Created, "docs/x.md").await;

    std::fs::remove_file(session.root().join("docs/x.md")).unwrap();
    wait_for(&mut inbox, FileEventKind::Deleted, "docs/x.md").await;

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_listener_gets_nothing() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sync_id = session.add_listener(Listener::sync(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let (removed, mut removed_inbox) = Listener::channel(64);
    let removed_id = session.add_listener(removed);
    let (kept, mut kept_inbox) = Listener::channel(64);
    session.add_listener(kept);

    assert!(session.remove_listener(sync_id));
    assert!(session.remove_listener(removed_id));
    assert_eq!(session.listener_count(), 1);

    write_file(session.root(), "after.txt", "x");
    wait_for(&mut kept_inbox, FileEventKind::Created, "after.txt").await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let leftover = tokio::time::timeout(EVENT_TIMEOUT, removed_inbox.recv())
        .await
        .expect("removed inbox should close");
    assert!(leftover.is_none());

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_listener_does_not_block_others() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");

    session.add_listener(Listener::sync(|_| anyhow::bail!("subscriber went away")));
    let (closed, closed_inbox) = Listener::channel(1);
    session.add_listener(closed);
    drop(closed_inbox);
    let (ok, mut ok_inbox) = Listener::channel(64);
    session.add_listener(ok);

    write_file(session.root(), "a.txt", "x");
    write_file(session.root(), "b.txt", "y");
    wait_for(&mut ok_inbox, FileEventKind::Created, "a.txt").await;
    wait_for(&mut ok_inbox, FileEventKind::Created, "b.txt").await;

    assert!(session.is_running());
    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_then_start_does_not_replay() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");
    let (listener, mut inbox) = Listener::channel(64);
    session.add_listener(listener);

    session.stop();
    assert!(!session.is_running());
    write_file(session.root(), "while_stopped.txt", "missed");
    assert!(drain(&mut inbox).await.is_empty());

    session.start().unwrap();
    assert!(session.is_running());
    write_file(session.root(), "after.txt", "seen");

    let mut seen = wait_for(&mut inbox, FileEventKind::Created, "after.txt").await;
    seen.extend(drain(&mut inbox).await);
    assert!(
        !seen.iter().any(|e| e.path == "while_stopped.txt"),
        "events: {:?}",
        seen
    );

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_keep_order() {
    let ws = TestWorkspace::new();
    let session = started_session(&ws, "alice");
    let (listener, mut inbox) = Listener::channel(256);
    session.add_listener(listener);

    let names: Vec<String> = (0..10).map(|i| format!("f{}.txt", i)).collect();
    for name in &names {
        write_file(session.root(), name, "x");
    }
    let seen = wait_for(&mut inbox, FileEventKind::Created, "f9.txt").await;

    let created: Vec<&str> = seen
        .iter()
        .filter(|e| e.kind == FileEventKind::Created)
        .map(|e| e.path.as_str())
        .collect();
    let expected: Vec<&str> = names.iter().map(String::as_str).collect();
    assert_eq!(created, expected);

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overflow_drops_oldest_events() {
    let ws = TestWorkspace::new();
    let config = WatcherConfig {
        event_capacity: 4,
        ..WatcherConfig::default()
    };
    let session = WatchSession::new(ws.root("alice"), config);
    session.start().unwrap();

    // Stall delivery on the first event for gate.txt until released
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = parking_lot::Mutex::new(release_rx);
    let stalled = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    session.add_listener(Listener::sync({
        let stalled = Arc::clone(&stalled);
        let seen = Arc::clone(&seen);
        move |event| {
            seen.lock().push(event.path.clone());
            if event.path == "gate.txt" && !stalled.swap(true, Ordering::SeqCst) {
                let _ = release_rx.lock().recv_timeout(EVENT_TIMEOUT);
            }
            Ok(())
        }
    }));

    write_file(session.root(), "gate.txt", "x");
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !stalled.load(Ordering::SeqCst) {
        assert!(tokio::time::Instant::now() < deadline, "gate event never delivered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Far more events than the queue holds, while delivery is stuck
    let names: Vec<String> = (0..20).map(|i| format!("f{:02}.txt", i)).collect();
    for name in &names {
        write_file(session.root(), name, "x");
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    release_tx.send(()).unwrap();

    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !seen.lock().iter().any(|p| p == "f19.txt") {
        assert!(
            tokio::time::Instant::now() < deadline,
            "newest event missing: {:?}",
            seen.lock()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let seen = seen.lock().clone();
    assert!(!seen.iter().any(|p| p == "f00.txt"), "oldest kept: {:?}", seen);
    let delivered = names.iter().filter(|n| seen.contains(n)).count();
    assert!(delivered < names.len(), "nothing was dropped: {:?}", seen);

    session.stop();
}
