//! Integration tests for the task synchronizer over the in-process store.
//!
//! Covers the front-end intents end to end:
//! - Optimistic reorder and snapshot reconciliation
//! - Validation before any store call
//! - Filter and search projections over the synchronized list
//! - Listener lifecycle (resubscribe, release, store-side errors)

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use taskboard::store::StoreError;
use taskboard::store::memory::MemoryStore;
use taskboard::sync::{ReorderOutcome, SyncError, SyncEvent, TaskSynchronizer, ValidationError};
use taskboard::view::{StatusFilter, TaskQuery};
use taskboard_proto::task::{Task, TaskDraft};
use tokio::sync::mpsc;

const BOARD: &str = "board";

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

type Events = mpsc::UnboundedReceiver<SyncEvent>;

/// Waits for the next synchronizer event.
async fn next_event(events: &mut Events) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for sync event")
        .expect("event channel closed")
}

/// Waits for the next snapshot, failing on any other event.
async fn next_snapshot(events: &mut Events) -> (usize, bool) {
    match next_event(events).await {
        SyncEvent::Snapshot {
            tasks,
            drift_resolved,
        } => (tasks, drift_resolved),
        other => panic!("expected snapshot, got {other:?}"),
    }
}

/// Subscribed synchronizer over an empty board, plus tasks added through it.
async fn board_with(
    titles: &[&str],
) -> (
    Arc<MemoryStore>,
    TaskSynchronizer<MemoryStore>,
    taskboard::sync::SyncHandle,
    Events,
) {
    let store = Arc::new(MemoryStore::new());
    let (sync, mut events) = TaskSynchronizer::new(Arc::clone(&store), BOARD);
    let handle = sync.subscribe().await.unwrap();
    assert_eq!(next_snapshot(&mut events).await, (0, false));

    for (i, title) in titles.iter().enumerate() {
        sync.add_task(TaskDraft::new(*title, "alice", "bob"))
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut events).await.0, i + 1);
    }
    (store, sync, handle, events)
}

fn titles(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.title.clone()).collect()
}

fn orders(tasks: &[Task]) -> Vec<u32> {
    tasks.iter().map(|t| t.order).collect()
}

// ===========================================================================
// Adding and ordering
// ===========================================================================

#[tokio::test]
async fn added_tasks_append_in_order() {
    let (store, sync, _handle, _events) = board_with(&["A", "B", "C"]).await;

    assert_eq!(titles(&sync.tasks()), ["A", "B", "C"]);
    assert_eq!(orders(&sync.tasks()), [0, 1, 2]);
    assert_eq!(store.snapshot(BOARD), sync.tasks());
    assert_eq!(sync.active_count(), 3);
}

#[tokio::test]
async fn add_is_visible_only_after_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let (sync, _events) = TaskSynchronizer::new(Arc::clone(&store), BOARD);

    // No listener: the store has the task but the local list never hears of it.
    sync.add_task(TaskDraft::new("A", "alice", "bob"))
        .await
        .unwrap();
    assert!(sync.tasks().is_empty());
    assert_eq!(store.snapshot(BOARD).len(), 1);
}

#[tokio::test]
async fn blank_fields_are_rejected_without_store_calls() {
    let (store, sync, _handle, _events) = board_with(&[]).await;
    let before = store.calls().writes();

    let cases = [
        (TaskDraft::new("  ", "alice", "bob"), ValidationError::TitleEmpty),
        (TaskDraft::new("T", "\t", "bob"), ValidationError::CreatorEmpty),
        (TaskDraft::new("T", "alice", " "), ValidationError::AssigneeEmpty),
    ];
    for (draft, expected) in cases {
        match sync.add_task(draft).await {
            Err(SyncError::Validation(err)) => assert_eq!(err, expected),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
    assert_eq!(store.calls().writes(), before);
}

#[tokio::test]
async fn draft_extras_are_stored() {
    let (store, sync, _handle, _events) = board_with(&[]).await;

    let mut draft = TaskDraft::new("Taxes", "alice", "bob");
    draft.description = "  file before April  ".to_string();
    draft.due_date = chrono::NaiveDate::from_ymd_opt(2026, 4, 15);
    draft.priority = taskboard_proto::task::Priority::High;
    let id = sync.add_task(draft).await.unwrap();

    let stored = store.snapshot(BOARD);
    let task = stored.iter().find(|t| t.id == id).unwrap();
    assert_eq!(task.description.as_deref(), Some("file before April"));
    assert_eq!(task.due_date, chrono::NaiveDate::from_ymd_opt(2026, 4, 15));
    assert_eq!(task.priority, taskboard_proto::task::Priority::High);
}

// ===========================================================================
// Reorder
// ===========================================================================

#[tokio::test]
async fn move_first_onto_last() {
    let (store, sync, _handle, mut events) = board_with(&["A", "B", "C"]).await;
    let tasks = sync.tasks();

    let outcome = sync.reorder(&tasks[0].id, &tasks[2].id).await.unwrap();
    assert_eq!(outcome, ReorderOutcome::Applied { writes: 3 });

    // Optimistic list already reflects the move.
    assert_eq!(titles(&sync.tasks()), ["B", "C", "A"]);
    assert_eq!(orders(&sync.tasks()), [0, 1, 2]);

    // One atomic batch, then one snapshot confirming it.
    assert_eq!(store.calls().batches, 1);
    next_snapshot(&mut events).await;
    assert_eq!(titles(&sync.tasks()), ["B", "C", "A"]);
    assert_eq!(store.snapshot(BOARD), sync.tasks());
}

#[tokio::test]
async fn move_last_onto_first() {
    let (_store, sync, _handle, mut events) = board_with(&["A", "B", "C", "D"]).await;
    let tasks = sync.tasks();

    sync.reorder(&tasks[3].id, &tasks[0].id).await.unwrap();
    next_snapshot(&mut events).await;
    assert_eq!(titles(&sync.tasks()), ["D", "A", "B", "C"]);
    assert_eq!(orders(&sync.tasks()), [0, 1, 2, 3]);
}

#[tokio::test]
async fn unknown_id_leaves_list_untouched() {
    let (store, sync, _handle, _events) = board_with(&["A", "B"]).await;
    let before = sync.tasks();

    let stranger = taskboard_proto::task::TaskId::new();
    assert_eq!(
        sync.reorder(&stranger, &before[0].id).await.unwrap(),
        ReorderOutcome::Skipped
    );
    assert_eq!(
        sync.reorder(&before[0].id, &before[0].id).await.unwrap(),
        ReorderOutcome::Skipped
    );
    assert_eq!(sync.tasks(), before);
    assert_eq!(store.calls().batches, 0);
}

#[tokio::test]
async fn failed_batch_is_overwritten_by_next_snapshot() {
    let (store, sync, _handle, mut events) = board_with(&["A", "B", "C"]).await;
    let tasks = sync.tasks();

    store.fail_batches(true);
    let err = sync.reorder(&tasks[0].id, &tasks[2].id).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Persistence(StoreError::Unavailable(_))
    ));

    // Optimistic permutation stays visible and the drift is reported.
    assert_eq!(titles(&sync.tasks()), ["B", "C", "A"]);
    assert!(sync.is_drifted());
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::Drift { .. }
    ));

    // The store still holds the old permutation; its next snapshot wins.
    store.fail_batches(false);
    store.redeliver(BOARD);
    assert_eq!(next_snapshot(&mut events).await, (3, true));
    assert_eq!(titles(&sync.tasks()), ["A", "B", "C"]);
    assert!(!sync.is_drifted());
}

#[tokio::test]
async fn external_write_after_failed_reorder_also_resolves_drift() {
    let (store, sync, _handle, mut events) = board_with(&["A", "B"]).await;
    let tasks = sync.tasks();

    store.fail_batches(true);
    let _ = sync.reorder(&tasks[1].id, &tasks[0].id).await;
    let _ = next_event(&mut events).await;

    // Any committed write broadcasts a fresh snapshot.
    sync.toggle_completion(&tasks[0].id).await.unwrap();
    assert_eq!(next_snapshot(&mut events).await, (2, true));
    assert_eq!(titles(&sync.tasks()), ["A", "B"]);
    assert!(sync.tasks()[0].is_completed);
}

// ===========================================================================
// Toggle, rename, delete
// ===========================================================================

#[tokio::test]
async fn toggle_twice_is_identity() {
    let (_store, sync, _handle, mut events) = board_with(&["A", "B"]).await;
    let id = sync.tasks()[1].id.clone();

    sync.toggle_completion(&id).await.unwrap();
    next_snapshot(&mut events).await;
    assert!(sync.tasks()[1].is_completed);
    assert_eq!(sync.active_count(), 1);

    sync.toggle_completion(&id).await.unwrap();
    next_snapshot(&mut events).await;
    assert!(!sync.tasks()[1].is_completed);
    assert_eq!(sync.active_count(), 2);
}

#[tokio::test]
async fn rename_and_delete_round_trip() {
    let (store, sync, _handle, mut events) = board_with(&["A", "B"]).await;
    let tasks = sync.tasks();

    sync.rename_task(&tasks[0].id, " Alpha ").await.unwrap();
    next_snapshot(&mut events).await;
    assert_eq!(titles(&sync.tasks()), ["Alpha", "B"]);

    sync.delete_task(&tasks[0].id).await.unwrap();
    next_snapshot(&mut events).await;
    assert_eq!(titles(&sync.tasks()), ["B"]);

    // Deleting again is harmless.
    sync.delete_task(&tasks[0].id).await.unwrap();
    assert_eq!(store.snapshot(BOARD).len(), 1);
}

#[tokio::test]
async fn write_failures_surface_as_persistence_errors() {
    let (store, sync, _handle, _events) = board_with(&["A"]).await;
    let id = sync.tasks()[0].id.clone();

    store.fail_next_writes(3);
    assert!(matches!(
        sync.toggle_completion(&id).await,
        Err(SyncError::Persistence(_))
    ));
    assert!(matches!(
        sync.rename_task(&id, "B").await,
        Err(SyncError::Persistence(_))
    ));
    assert!(matches!(
        sync.delete_task(&id).await,
        Err(SyncError::Persistence(_))
    ));

    // Local list untouched by any of the failures.
    assert_eq!(titles(&sync.tasks()), ["A"]);
    assert!(!sync.tasks()[0].is_completed);
}

// ===========================================================================
// Filtering
// ===========================================================================

#[tokio::test]
async fn visible_applies_status_and_search() {
    let (_store, sync, _handle, mut events) = board_with(&[]).await;
    for (title, assignee) in [
        ("Buy milk", "alice smith"),
        ("Fix bike", "bob"),
        ("Call mom", "carol"),
    ] {
        sync.add_task(TaskDraft::new(title, "dave", assignee))
            .await
            .unwrap();
        next_snapshot(&mut events).await;
    }
    let fix_bike = sync.tasks()[1].id.clone();
    sync.toggle_completion(&fix_bike).await.unwrap();
    next_snapshot(&mut events).await;

    let active = sync.visible(&TaskQuery::new(StatusFilter::Active, ""));
    assert_eq!(titles(&active), ["Buy milk", "Call mom"]);

    let completed = sync.visible(&TaskQuery::new(StatusFilter::Completed, ""));
    assert_eq!(titles(&completed), ["Fix bike"]);

    let by_assignee = sync.visible(&TaskQuery::new(StatusFilter::All, "ALICE"));
    assert_eq!(titles(&by_assignee), ["Buy milk"]);

    let by_creator = sync.visible(&TaskQuery::new(StatusFilter::Active, "Dave"));
    assert_eq!(titles(&by_creator), ["Buy milk", "Call mom"]);
}

// ===========================================================================
// Listener lifecycle
// ===========================================================================

#[tokio::test]
async fn release_is_idempotent_and_stops_updates() {
    let (store, sync, handle, mut events) = board_with(&["A"]).await;

    handle.release();
    handle.release();
    assert!(!handle.is_active());
    assert!(!sync.is_subscribed());
    assert_eq!(store.subscriber_count(), 0);

    sync.add_task(TaskDraft::new("B", "alice", "bob"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(titles(&sync.tasks()), ["A"]);
}

#[tokio::test]
async fn resubscribe_keeps_a_single_listener() {
    let (store, sync, first, mut events) = board_with(&["A"]).await;

    let second = sync.subscribe().await.unwrap();
    next_snapshot(&mut events).await;
    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(store.subscriber_count(), 1);

    drop(first);
    assert!(second.is_active());
    assert_eq!(store.subscriber_count(), 1);
}

#[tokio::test]
async fn listener_error_needs_fresh_subscribe() {
    let (store, sync, _handle, mut events) = board_with(&["A", "B"]).await;

    store.push_listener_error("permission denied");
    assert_eq!(
        next_event(&mut events).await,
        SyncEvent::ListenerFailed {
            reason: "permission denied".to_string()
        }
    );
    assert_eq!(titles(&sync.tasks()), ["A", "B"]);
    assert!(!sync.is_subscribed());

    // A fresh subscription picks up again.
    let _again = sync.subscribe().await.unwrap();
    assert_eq!(next_snapshot(&mut events).await, (2, false));
    assert!(sync.is_subscribed());
    sync.add_task(TaskDraft::new("C", "alice", "bob"))
        .await
        .unwrap();
    assert_eq!(next_snapshot(&mut events).await.0, 3);
}

#[tokio::test]
async fn dropping_synchronizer_releases_listener() {
    let store = Arc::new(MemoryStore::new());
    {
        let (sync, _events) = TaskSynchronizer::new(Arc::clone(&store), BOARD);
        let handle = sync.subscribe().await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        std::mem::forget(handle);
    }
    assert_eq!(store.subscriber_count(), 0);
}
