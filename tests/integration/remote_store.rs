//! Integration tests for the synchronizer over a live store server.
//!
//! Starts `taskboard-store` in-process and connects real WebSocket clients:
//! - Writes from one client reach every subscriber as snapshots
//! - Reorders commit atomically and converge across clients
//! - Rejected writes surface as persistence errors
//! - Oversized writes fail fast instead of timing out
//! - Releasing a handle unsubscribes on the server

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use taskboard::store::remote::{REQUEST_TIMEOUT, WsStore};
use taskboard::store::{BackendType, RemoteStore, StoreError};
use taskboard::sync::{ReorderOutcome, SyncError, SyncEvent, TaskSynchronizer};
use taskboard_proto::collection::SortDirection;
use taskboard_proto::task::{FieldWrite, Task, TaskDraft, TaskId, TaskPatch};
use taskboard_proto::wire::MAX_FRAME_SIZE;
use taskboard_store::server::{self, ServerState};
use taskboard_store::store::DocumentStore;
use tokio::sync::mpsc;

const BOARD: &str = "team";

type Events = mpsc::UnboundedReceiver<SyncEvent>;

/// Start the store server in-process and return a ws:// URL and its state.
async fn start_store() -> (String, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start store server");
    (format!("ws://{addr}/ws"), state, handle)
}

/// Start a server with a custom frame limit, seeded with `count` tasks.
async fn start_seeded_store(
    max_frame_size: usize,
    count: u32,
) -> (String, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::with_config(
        max_frame_size,
        DocumentStore::new(),
    ));
    for order in 0..count {
        let fields = TaskDraft::new(format!("T{order}"), "alice", "bob")
            .into_fields(u64::from(order), order);
        state.store.create(BOARD, fields).await.unwrap();
    }
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start store server");
    (format!("ws://{addr}/ws"), state, handle)
}

async fn stored_orders(state: &ServerState) -> Vec<u32> {
    state
        .store
        .snapshot(BOARD, SortDirection::Ascending)
        .await
        .iter()
        .map(|t| t.order)
        .collect()
}

async fn connect(url: &str) -> (TaskSynchronizer<WsStore>, Events) {
    let store = WsStore::connect(url).await.unwrap();
    TaskSynchronizer::new(Arc::new(store), BOARD)
}

async fn next_snapshot(events: &mut Events) -> usize {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for snapshot")
        .expect("event channel closed");
    match event {
        SyncEvent::Snapshot { tasks, .. } => tasks,
        other => panic!("expected snapshot, got {other:?}"),
    }
}

/// Waits until a snapshot with `count` tasks has been applied.
async fn settle(events: &mut Events, count: usize) {
    while next_snapshot(events).await != count {}
}

fn titles(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.title.clone()).collect()
}

#[tokio::test]
async fn writes_from_one_client_reach_the_other() {
    let (url, _state, _handle) = start_store().await;
    let (alice, mut alice_events) = connect(&url).await;
    let (bob, mut bob_events) = connect(&url).await;

    let _alice_sub = alice.subscribe().await.unwrap();
    let _bob_sub = bob.subscribe().await.unwrap();
    assert_eq!(next_snapshot(&mut alice_events).await, 0);
    assert_eq!(next_snapshot(&mut bob_events).await, 0);
    assert_eq!(alice.backend_type(), BackendType::Remote);

    alice
        .add_task(TaskDraft::new("Plan sprint", "alice", "bob"))
        .await
        .unwrap();
    settle(&mut bob_events, 1).await;
    assert_eq!(titles(&bob.tasks()), ["Plan sprint"]);
    assert_eq!(bob.tasks()[0].order, 0);

    let id = bob.tasks()[0].id.clone();
    bob.toggle_completion(&id).await.unwrap();
    loop {
        next_snapshot(&mut alice_events).await;
        if alice.tasks().first().is_some_and(|t| t.is_completed) {
            break;
        }
    }
    assert_eq!(alice.active_count(), 0);
}

#[tokio::test]
async fn reorder_converges_across_clients() {
    let (url, _state, _handle) = start_store().await;
    let (alice, mut alice_events) = connect(&url).await;
    let (bob, mut bob_events) = connect(&url).await;
    let _alice_sub = alice.subscribe().await.unwrap();
    let _bob_sub = bob.subscribe().await.unwrap();
    next_snapshot(&mut alice_events).await;
    next_snapshot(&mut bob_events).await;

    for title in ["A", "B", "C"] {
        alice
            .add_task(TaskDraft::new(title, "alice", "bob"))
            .await
            .unwrap();
    }
    settle(&mut alice_events, 3).await;
    settle(&mut bob_events, 3).await;
    assert_eq!(titles(&alice.tasks()), ["A", "B", "C"]);

    let tasks = alice.tasks();
    let outcome = alice.reorder(&tasks[0].id, &tasks[2].id).await.unwrap();
    assert_eq!(outcome, ReorderOutcome::Applied { writes: 3 });
    assert_eq!(titles(&alice.tasks()), ["B", "C", "A"]);

    // Bob sees the committed permutation in one snapshot.
    settle(&mut bob_events, 3).await;
    assert_eq!(titles(&bob.tasks()), ["B", "C", "A"]);
    let orders: Vec<u32> = bob.tasks().iter().map(|t| t.order).collect();
    assert_eq!(orders, [0, 1, 2]);
}

#[tokio::test]
async fn rejected_batch_changes_nothing() {
    let (url, _state, _handle) = start_store().await;
    let store = WsStore::connect(&url).await.unwrap();

    let fields = TaskDraft::new("A", "alice", "bob").into_fields(1, 0);
    let id = store.create(BOARD, fields).await.unwrap();

    let writes = vec![
        FieldWrite::new(id.clone(), TaskPatch::order(5)),
        FieldWrite::new(TaskId::new(), TaskPatch::order(0)),
    ];
    let err = store.batch_update(BOARD, writes).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));

    let (sync, mut events) = TaskSynchronizer::new(Arc::new(store), BOARD);
    let _sub = sync.subscribe().await.unwrap();
    assert_eq!(next_snapshot(&mut events).await, 1);
    assert_eq!(sync.tasks()[0].order, 0);
}

#[tokio::test]
async fn reorder_of_large_collection_persists() {
    let (url, state, _handle) = start_seeded_store(MAX_FRAME_SIZE, 4_000).await;
    let store = WsStore::connect(&url).await.unwrap();

    let tasks = state.store.snapshot(BOARD, SortDirection::Descending).await;
    let writes = tasks
        .iter()
        .zip(0u32..)
        .map(|(task, order)| FieldWrite::new(task.id.clone(), TaskPatch::order(order)))
        .collect();
    store.batch_update(BOARD, writes).await.unwrap();

    let reordered = state.store.snapshot(BOARD, SortDirection::Ascending).await;
    assert_eq!(reordered.first().unwrap().title, "T3999");
    assert_eq!(reordered.last().unwrap().title, "T0");
}

#[tokio::test]
async fn oversized_reorder_fails_fast_and_drifts() {
    let (url, state, _handle) = start_seeded_store(2_048, 200).await;
    let (sync, mut events) = connect(&url).await;
    let _sub = sync.subscribe().await.unwrap();
    assert_eq!(next_snapshot(&mut events).await, 200);

    let tasks = sync.tasks();
    let started = Instant::now();
    let err = sync
        .reorder(&tasks[0].id, &tasks[199].id)
        .await
        .unwrap_err();
    assert!(started.elapsed() < REQUEST_TIMEOUT / 2);
    assert!(matches!(
        err,
        SyncError::Persistence(StoreError::Rejected(_))
    ));
    assert!(sync.is_drifted());
    assert_eq!(sync.tasks()[199].id, tasks[0].id);
    assert!(matches!(events.recv().await, Some(SyncEvent::Drift { .. })));

    // Nothing was committed; the next snapshot restores the stored order.
    assert_eq!(stored_orders(&state).await, (0..200).collect::<Vec<_>>());
    state.broadcast(BOARD).await;
    assert_eq!(next_snapshot(&mut events).await, 200);
    assert!(!sync.is_drifted());
    assert_eq!(sync.tasks(), tasks);
}

#[tokio::test]
async fn client_frame_limit_keeps_request_off_the_wire() {
    let (url, state, _handle) = start_seeded_store(MAX_FRAME_SIZE, 20).await;
    let store = WsStore::connect(&url).await.unwrap().with_max_frame_size(128);

    let tasks = state.store.snapshot(BOARD, SortDirection::Descending).await;
    let writes = tasks
        .iter()
        .zip(0u32..)
        .map(|(task, order)| FieldWrite::new(task.id.clone(), TaskPatch::order(order)))
        .collect();
    let err = store.batch_update(BOARD, writes).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));
    assert_eq!(stored_orders(&state).await, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn rename_of_deleted_task_is_rejected() {
    let (url, _state, _handle) = start_store().await;
    let (sync, mut events) = connect(&url).await;
    let _sub = sync.subscribe().await.unwrap();
    next_snapshot(&mut events).await;

    let id = sync
        .add_task(TaskDraft::new("Gone soon", "alice", "bob"))
        .await
        .unwrap();
    sync.delete_task(&id).await.unwrap();

    let err = sync.rename_task(&id, "Too late").await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Persistence(StoreError::Rejected(_))
    ));
}

#[tokio::test]
async fn release_unsubscribes_on_server() {
    let (url, state, _handle) = start_store().await;
    let (sync, mut events) = connect(&url).await;

    let sub = sync.subscribe().await.unwrap();
    next_snapshot(&mut events).await;
    assert_eq!(state.listener_count(BOARD).await, 1);

    sub.release();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.listener_count(BOARD).await > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "server never saw the unsubscribe"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WsStore::connect(&format!("ws://{addr}/ws")).await;
    assert!(matches!(
        result,
        Err(StoreError::Unavailable(_) | StoreError::Timeout)
    ));
}
