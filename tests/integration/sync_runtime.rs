//! End-to-end tests for the sync worker: commands in, events out, with the
//! in-memory backend echoing every write through its change feed.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use todosync::backend::StoreError;
use todosync::backend::memory::{MemoryBackend, MemorySession, Operation};
use todosync::sync::{Action, SyncCommand, SyncConfig, SyncEvent, SyncHandle, spawn_sync};
use todosync::tasks::{ReconcileError, Reconciler};
use todosync_proto::task::{Task, TaskDraft, TaskId, UserId};

const WAIT: Duration = Duration::from_secs(2);

fn row(id: &str, owner: &str, created_at: &str) -> Task {
    Task {
        id: TaskId::new(id),
        owner: UserId::new(owner),
        title: format!("task {id}"),
        completed: false,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap(),
        due_date: None,
        priority: None,
    }
}

fn start(backend: &MemoryBackend, session: &MemorySession) -> SyncHandle {
    spawn_sync(
        Reconciler::new(backend.clone()),
        backend.clone(),
        session.clone(),
        SyncConfig::default(),
    )
}

async fn next_event(rx: &mut mpsc::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
async fn wait_for(
    rx: &mut mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Wait for the next snapshot and return its ids.
async fn next_list(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<String> {
    match wait_for(rx, |e| matches!(e, SyncEvent::ListChanged(_))).await {
        SyncEvent::ListChanged(tasks) => tasks.iter().map(|t| t.id.to_string()).collect(),
        _ => unreachable!(),
    }
}

async fn shutdown(handle: SyncHandle) {
    handle.commands.send(SyncCommand::Shutdown).await.unwrap();
    tokio::time::timeout(WAIT, handle.join)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn sign_in_seeds_and_subscribes() {
    let backend = MemoryBackend::new();
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    backend.put_row(row("b", "u1", "2024-01-02T00:00:00Z"));
    backend.put_row(row("z", "u2", "2024-01-03T00:00:00Z"));
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);

    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::SessionChanged(Some(_))
    ));
    // Cleared list, then the seeded one.
    assert!(next_list(&mut handle.events).await.is_empty());
    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::Seeded { count: 2 }
    ));
    assert_eq!(next_list(&mut handle.events).await, vec!["b", "a"]);
    assert_eq!(backend.subscriber_count(), 1);

    shutdown(handle).await;
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn create_is_accepted_then_echoed() {
    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;
    next_list(&mut handle.events).await;

    handle
        .commands
        .send(SyncCommand::Save(TaskDraft::create("buy milk")))
        .await
        .unwrap();

    let SyncEvent::Created(id) = next_event(&mut handle.events).await else {
        panic!("expected created");
    };
    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::Accepted(Action::Create)
    ));
    assert_eq!(next_list(&mut handle.events).await, vec![id.to_string()]);

    shutdown(handle).await;
}

#[tokio::test]
async fn rejected_write_leaves_list_alone() {
    let backend = MemoryBackend::new();
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;
    next_list(&mut handle.events).await;

    backend.fail_next(Operation::Delete, StoreError::Transport("offline".into()));
    handle
        .commands
        .send(SyncCommand::Delete(TaskId::new("a")))
        .await
        .unwrap();

    match next_event(&mut handle.events).await {
        SyncEvent::Rejected { action, error } => {
            assert_eq!(action, Action::Delete(TaskId::new("a")));
            assert!(matches!(error, ReconcileError::RemoteWrite(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(backend.row(&TaskId::new("a")).is_some());

    // The worker keeps serving commands.
    handle
        .commands
        .send(SyncCommand::Toggle(TaskId::new("a")))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::Accepted(Action::Toggle(_))
    ));

    shutdown(handle).await;
}

#[tokio::test]
async fn unknown_task_is_skipped() {
    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;

    handle
        .commands
        .send(SyncCommand::Toggle(TaskId::new("nope")))
        .await
        .unwrap();
    let event = wait_for(&mut handle.events, |e| {
        matches!(e, SyncEvent::Skipped(_) | SyncEvent::Accepted(_))
    })
    .await;
    assert!(matches!(event, SyncEvent::Skipped(Action::Toggle(_))));
    assert!(backend.writes().is_empty());

    shutdown(handle).await;
}

#[tokio::test]
async fn sign_out_clears_and_detaches() {
    let backend = MemoryBackend::new();
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;

    handle.commands.send(SyncCommand::SignOut).await.unwrap();
    wait_for(&mut handle.events, |e| {
        matches!(e, SyncEvent::SessionChanged(None))
    })
    .await;
    assert!(next_list(&mut handle.events).await.is_empty());
    assert_eq!(backend.subscriber_count(), 0);

    // Commands without a session fail.
    handle
        .commands
        .send(SyncCommand::Delete(TaskId::new("a")))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::Rejected {
            error: ReconcileError::NoSession,
            ..
        }
    ));

    shutdown(handle).await;
}

#[tokio::test]
async fn switching_users_reseeds() {
    let backend = MemoryBackend::new();
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    backend.put_row(row("b", "u2", "2024-01-02T00:00:00Z"));
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;
    assert_eq!(next_list(&mut handle.events).await, vec!["a"]);

    session.sign_in(UserId::new("u2"));
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;
    assert_eq!(next_list(&mut handle.events).await, vec!["b"]);
    assert_eq!(backend.subscriber_count(), 1);

    shutdown(handle).await;
}

#[tokio::test]
async fn load_failure_is_reported() {
    let backend = MemoryBackend::new();
    backend.fail_next(Operation::List, StoreError::Transport("offline".into()));
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);

    let event = wait_for(&mut handle.events, |e| {
        matches!(e, SyncEvent::LoadFailed(_) | SyncEvent::Seeded { .. })
    })
    .await;
    assert!(matches!(
        event,
        SyncEvent::LoadFailed(ReconcileError::RemoteRead(_))
    ));

    shutdown(handle).await;
}

#[tokio::test]
async fn undecodable_payload_is_skipped() {
    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;
    next_list(&mut handle.events).await;

    backend.publish_raw("{not json");
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    backend.publish(&todosync_proto::change::ChangeNotification::Inserted(row(
        "a",
        "u1",
        "2024-01-01T00:00:00Z",
    )));
    assert_eq!(next_list(&mut handle.events).await, vec!["a"]);

    shutdown(handle).await;
}

#[tokio::test]
async fn closed_feed_is_reported() {
    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);
    wait_for(&mut handle.events, |e| matches!(e, SyncEvent::Seeded { .. })).await;

    backend.close_feed();
    assert!(matches!(
        wait_for(&mut handle.events, |e| matches!(e, SyncEvent::FeedLost(_))).await,
        SyncEvent::FeedLost(todosync::backend::FeedError::Closed)
    ));

    shutdown(handle).await;
}

#[tokio::test]
async fn subscribe_failure_still_seeds() {
    let backend = MemoryBackend::new();
    backend.put_row(row("a", "u1", "2024-01-01T00:00:00Z"));
    backend.fail_next_subscribe("realtime unavailable");
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = start(&backend, &session);

    assert!(matches!(
        wait_for(&mut handle.events, |e| matches!(e, SyncEvent::FeedLost(_))).await,
        SyncEvent::FeedLost(todosync::backend::FeedError::SubscribeFailed(_))
    ));
    assert!(matches!(
        next_event(&mut handle.events).await,
        SyncEvent::Seeded { count: 1 }
    ));

    shutdown(handle).await;
}

#[tokio::test]
async fn dropping_command_sender_stops_worker() {
    let backend = MemoryBackend::new();
    let session = MemorySession::new();
    let handle = start(&backend, &session);
    drop(handle.commands);
    tokio::time::timeout(WAIT, handle.join)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn bulk_commands_flow_while_events_drain() {
    const CAPACITY: usize = 4;
    const SAVES: usize = 3 * CAPACITY + 5;

    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let mut handle = spawn_sync(
        Reconciler::new(backend.clone()),
        backend.clone(),
        session.clone(),
        SyncConfig {
            channel_capacity: CAPACITY,
            ..SyncConfig::default()
        },
    );

    let mut queued =
        (0..SAVES).map(|i| SyncCommand::Save(TaskDraft::create(format!("task {i}"))));
    let mut pending = queued.next();
    let mut accepted = 0;

    let run = async {
        while accepted < SAVES {
            tokio::select! {
                permit = handle.commands.reserve(), if pending.is_some() => {
                    if let Some(command) = pending.take() {
                        permit.unwrap().send(command);
                    }
                    pending = queued.next();
                }
                event = handle.events.recv() => {
                    if matches!(event.unwrap(), SyncEvent::Accepted(Action::Create)) {
                        accepted += 1;
                    }
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("command and event channels deadlocked");

    assert_eq!(backend.row_count(), SAVES);

    // Echoes for the last saves may still be waiting on the event channel.
    drop(handle.events);
    drop(handle.commands);
    tokio::time::timeout(WAIT, handle.join)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn closing_channels_stops_worker_blocked_on_events() {
    let backend = MemoryBackend::new();
    let session = MemorySession::signed_in(UserId::new("u1"));
    let handle = spawn_sync(
        Reconciler::new(backend.clone()),
        backend.clone(),
        session.clone(),
        SyncConfig {
            channel_capacity: 2,
            ..SyncConfig::default()
        },
    );

    // Nobody reads events, so the worker stalls on the full event channel.
    for i in 0..2 {
        let _ = handle
            .commands
            .try_send(SyncCommand::Save(TaskDraft::create(format!("task {i}"))));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(handle.events);
    drop(handle.commands);
    tokio::time::timeout(WAIT, handle.join)
        .await
        .expect("worker did not stop")
        .unwrap();
}
