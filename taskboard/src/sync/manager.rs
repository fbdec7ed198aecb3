//! The task list synchronizer.
//!
//! [`TaskSynchronizer`] owns the local ordered task list for one collection.
//! A spawned listener task replaces the list on every store snapshot;
//! front-end calls write through the store and, for reorders, update the
//! list optimistically first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use taskboard_proto::collection::SortDirection;
use taskboard_proto::task::{MAX_TITLE_LENGTH, Task, TaskDraft, TaskId, TaskPatch};
use tokio::sync::mpsc;

use super::reorder::plan_reorder;
use super::{ReorderOutcome, SyncError, SyncEvent, validate_draft, validate_title};
use crate::store::{BackendType, ListenerEvent, ListenerGuard, RemoteStore};
use crate::view::{self, TaskQuery};

/// State shared between the synchronizer and its listener task.
struct Shared {
    /// Ordered by `order` ascending; the latest snapshot or optimistic view.
    tasks: RwLock<Vec<Task>>,
    /// Set when a reorder batch failed and no snapshot has arrived since.
    drifted: AtomicBool,
    reorder_in_flight: AtomicBool,
    /// Generation of the listener allowed to write `tasks`.
    generation: AtomicU64,
    /// Snapshots applied so far.
    snapshots: AtomicU64,
}

impl Shared {
    /// Replaces the list wholesale. Returns whether a drift was cleared.
    fn apply_snapshot(&self, tasks: Vec<Task>) -> bool {
        let mut current = self.tasks.write();
        *current = tasks;
        self.snapshots.fetch_add(1, Ordering::AcqRel);
        self.drifted.swap(false, Ordering::AcqRel)
    }

    /// Flags drift unless a snapshot has replaced the list since `seen`.
    fn mark_drifted(&self, seen: u64) -> bool {
        let _tasks = self.tasks.write();
        if self.snapshots.load(Ordering::Acquire) != seen {
            return false;
        }
        self.drifted.store(true, Ordering::Release);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

/// Listener registration owned jointly by a [`SyncHandle`] and the
/// synchronizer that created it.
struct HandleState {
    shared: Arc<Shared>,
    generation: u64,
    parts: Mutex<Option<(ListenerGuard, tokio::task::JoinHandle<()>)>>,
    /// Cleared by the listener task when the store ends the listener.
    alive: Arc<AtomicBool>,
}

impl HandleState {
    fn release(&self) {
        let Some((mut guard, task)) = self.parts.lock().take() else {
            return;
        };
        // Retire this generation first so an in-progress event is dropped.
        let _ = self.shared.generation.compare_exchange(
            self.generation,
            self.generation.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        guard.release();
        task.abort();
        tracing::debug!(generation = self.generation, "listener released");
    }

    fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.parts.lock().is_some()
    }
}

/// Scoped handle to the synchronizer's live listener.
///
/// [`SyncHandle::release`] stops the listener; it is idempotent and runs
/// automatically on drop. Subscribing again through the synchronizer also
/// releases the previous handle.
pub struct SyncHandle {
    state: Arc<HandleState>,
}

impl SyncHandle {
    /// Stops the listener. Safe to call any number of times.
    pub fn release(&self) {
        self.state.release();
    }

    /// Returns `true` until the listener is released or the store ends it.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("generation", &self.state.generation)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Resets the reorder flag when the reorder finishes, on every path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a local ordered task list in step with a [`RemoteStore`] collection.
pub struct TaskSynchronizer<S: RemoteStore> {
    store: Arc<S>,
    collection: String,
    max_title_length: usize,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<SyncEvent>,
    current: Mutex<Option<Arc<HandleState>>>,
}

impl<S: RemoteStore> TaskSynchronizer<S> {
    /// Creates a synchronizer for `collection` and the receiver for its
    /// [`SyncEvent`]s.
    pub fn new(
        store: Arc<S>,
        collection: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let sync = Self {
            store,
            collection: collection.into(),
            max_title_length: MAX_TITLE_LENGTH,
            shared: Arc::new(Shared {
                tasks: RwLock::new(Vec::new()),
                drifted: AtomicBool::new(false),
                reorder_in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                snapshots: AtomicU64::new(0),
            }),
            events,
            current: Mutex::new(None),
        };
        (sync, events_rx)
    }

    /// Overrides the title length cap.
    #[must_use]
    pub fn with_max_title_length(mut self, max: usize) -> Self {
        self.max_title_length = max;
        self
    }

    /// Returns the current timestamp in milliseconds since epoch.
    fn now_ms() -> u64 {
        u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX)
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Starts the live listener, releasing any previous one.
    ///
    /// Snapshots replace the local list as they arrive. A listener error is
    /// reported as [`SyncEvent::ListenerFailed`] and the last list is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the store refuses the listener.
    pub async fn subscribe(&self) -> Result<SyncHandle, SyncError> {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.release();
        }

        let listener = self
            .store
            .subscribe(&self.collection, SortDirection::Ascending)
            .await
            .inspect_err(|e| {
                tracing::warn!(collection = %self.collection, error = %e, "subscribe failed");
            })?;
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (events_rx, guard) = listener.into_parts();
        let alive = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(run_listener(
            events_rx,
            Arc::clone(&self.shared),
            self.events.clone(),
            generation,
            self.collection.clone(),
            Arc::clone(&alive),
        ));

        let state = Arc::new(HandleState {
            shared: Arc::clone(&self.shared),
            generation,
            parts: Mutex::new(Some((guard, task))),
            alive,
        });
        let replaced = self.current.lock().replace(Arc::clone(&state));
        if let Some(replaced) = replaced {
            replaced.release();
        }

        tracing::info!(
            collection = %self.collection,
            backend = %self.store.backend_type(),
            generation,
            "subscribed"
        );
        Ok(SyncHandle { state })
    }

    /// Validates a draft and creates the task in the store.
    ///
    /// The new task gets `order = len(tasks)`. It is not inserted locally;
    /// it appears with the next snapshot.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] for an invalid draft (no store call is made).
    /// - [`SyncError::Persistence`] if the store fails the create.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<TaskId, SyncError> {
        validate_draft(&draft, self.max_title_length)?;

        let order = u32::try_from(self.shared.tasks.read().len()).unwrap_or(u32::MAX);
        let fields = draft.into_fields(Self::now_ms(), order);
        let id = self
            .store
            .create(&self.collection, fields)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "create failed"))?;

        tracing::info!(collection = %self.collection, id = %id, order, "task created");
        Ok(id)
    }

    /// Deletes a task in the store. The local list updates with the next
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the store fails the delete.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), SyncError> {
        self.store
            .delete(&self.collection, id)
            .await
            .inspect_err(|e| tracing::warn!(id = %id, error = %e, "delete failed"))?;
        tracing::info!(collection = %self.collection, id = %id, "task deleted");
        Ok(())
    }

    /// Flips the completion flag of a task in the local list.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if the id is not in the local list.
    /// - [`SyncError::Persistence`] if the store fails the update.
    pub async fn toggle_completion(&self, id: &TaskId) -> Result<(), SyncError> {
        let current = self
            .shared
            .tasks
            .read()
            .iter()
            .find(|t| &t.id == id)
            .map(|t| t.is_completed);
        let Some(is_completed) = current else {
            return Err(SyncError::NotFound(id.clone()));
        };

        self.store
            .update_fields(&self.collection, id, TaskPatch::completed(!is_completed))
            .await
            .inspect_err(|e| tracing::warn!(id = %id, error = %e, "toggle failed"))?;
        tracing::info!(id = %id, is_completed = !is_completed, "task toggled");
        Ok(())
    }

    /// Sets a new title on a task.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] for an empty or over-long title (no store call).
    /// - [`SyncError::Persistence`] if the store fails the update.
    pub async fn rename_task(&self, id: &TaskId, title: &str) -> Result<(), SyncError> {
        validate_title(title, self.max_title_length)?;
        self.store
            .update_fields(&self.collection, id, TaskPatch::title(title.trim()))
            .await
            .inspect_err(|e| tracing::warn!(id = %id, error = %e, "rename failed"))?;
        tracing::info!(id = %id, "task renamed");
        Ok(())
    }

    /// Moves task `from` to the position currently held by task `to`.
    ///
    /// The new sequence is applied locally before the store is asked to
    /// persist it, and only orders that changed are written. If the batch
    /// fails the local list keeps the optimistic sequence, the synchronizer
    /// is flagged as drifted, and the next snapshot restores the store's
    /// sequence. A snapshot that lands while the batch is pending already
    /// restores it, so no drift is flagged then.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ReorderInFlight`] if another reorder has not finished.
    /// - [`SyncError::Persistence`] if the store fails the batch.
    pub async fn reorder(&self, from: &TaskId, to: &TaskId) -> Result<ReorderOutcome, SyncError> {
        if self.shared.reorder_in_flight.swap(true, Ordering::AcqRel) {
            return Err(SyncError::ReorderInFlight);
        }
        let _in_flight = InFlight(&self.shared.reorder_in_flight);

        let (writes, seen) = {
            let mut tasks = self.shared.tasks.write();
            let Some(plan) = plan_reorder(&tasks, from, to) else {
                tracing::debug!(from = %from, to = %to, "reorder skipped");
                return Ok(ReorderOutcome::Skipped);
            };
            *tasks = plan.tasks;
            (plan.writes, self.shared.snapshots.load(Ordering::Acquire))
        };

        let count = writes.len();
        if count == 0 {
            return Ok(ReorderOutcome::Applied { writes: 0 });
        }

        match self.store.batch_update(&self.collection, writes).await {
            Ok(()) => {
                tracing::info!(from = %from, to = %to, writes = count, "reorder persisted");
                Ok(ReorderOutcome::Applied { writes: count })
            }
            Err(e) => {
                if self.shared.mark_drifted(seen) {
                    tracing::warn!(
                        from = %from,
                        to = %to,
                        error = %e,
                        "reorder batch failed, local order drifted"
                    );
                    self.emit(SyncEvent::Drift {
                        reason: e.to_string(),
                    });
                } else {
                    tracing::warn!(
                        from = %from,
                        to = %to,
                        error = %e,
                        "reorder batch failed, list already replaced by a snapshot"
                    );
                }
                Err(SyncError::Persistence(e))
            }
        }
    }

    /// Snapshot of the local list in display order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.tasks.read().clone()
    }

    /// The local list filtered by status and search text.
    #[must_use]
    pub fn visible(&self, query: &TaskQuery) -> Vec<Task> {
        view::filter_tasks(&self.shared.tasks.read(), query)
    }

    /// Number of incomplete tasks in the local list.
    #[must_use]
    pub fn active_count(&self) -> usize {
        view::active_count(&self.shared.tasks.read())
    }

    /// `true` after a failed reorder until the next snapshot arrives.
    #[must_use]
    pub fn is_drifted(&self) -> bool {
        self.shared.drifted.load(Ordering::Acquire)
    }

    /// `true` while a reorder is waiting for the store.
    #[must_use]
    pub fn is_reorder_in_flight(&self) -> bool {
        self.shared.reorder_in_flight.load(Ordering::Acquire)
    }

    /// `true` while a listener started by [`Self::subscribe`] is live.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|state| state.is_active())
    }

    /// The collection this synchronizer mirrors.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The store backing this synchronizer.
    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.store.backend_type()
    }
}

impl<S: RemoteStore> Drop for TaskSynchronizer<S> {
    fn drop(&mut self) {
        if let Some(state) = self.current.lock().take() {
            state.release();
        }
    }
}

/// Applies listener events to the shared list until the listener ends or a
/// newer subscription takes over.
async fn run_listener(
    mut events: mpsc::UnboundedReceiver<ListenerEvent>,
    shared: Arc<Shared>,
    out: mpsc::UnboundedSender<SyncEvent>,
    generation: u64,
    collection: String,
    alive: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        if !shared.is_current(generation) {
            return;
        }
        match event {
            ListenerEvent::Snapshot(tasks) => {
                let count = tasks.len();
                let drift_resolved = shared.apply_snapshot(tasks);
                tracing::debug!(
                    collection = %collection,
                    tasks = count,
                    drift_resolved,
                    "snapshot applied"
                );
                let _ = out.send(SyncEvent::Snapshot {
                    tasks: count,
                    drift_resolved,
                });
            }
            ListenerEvent::Error(reason) => {
                alive.store(false, Ordering::Release);
                tracing::warn!(collection = %collection, reason = %reason, "listener failed");
                let _ = out.send(SyncEvent::ListenerFailed { reason });
                return;
            }
        }
    }

    alive.store(false, Ordering::Release);
    if shared.is_current(generation) {
        tracing::warn!(collection = %collection, "listener closed by store");
        let _ = out.send(SyncEvent::ListenerFailed {
            reason: "listener closed".to_string(),
        });
    }
}
