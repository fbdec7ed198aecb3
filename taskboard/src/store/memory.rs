//! In-process store for tests and offline use.
//!
//! [`MemoryStore`] keeps one [`DocumentSet`] per collection and pushes a
//! full ordered snapshot to every listener of a collection after each
//! committed write, the same contract the WebSocket server honours. It also
//! counts calls and can inject failures so synchronizer tests can observe
//! exactly what reached the store.
//!
//! Writes are staged on a copy of the collection. An optional commit hook
//! sees the would-be contents first; if it fails, nothing is committed and
//! no listener hears about the write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::collection::{DocumentSet, SortDirection};
use taskboard_proto::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};
use tokio::sync::mpsc;

use super::{BackendType, Listener, ListenerEvent, RemoteStore, StoreError};

/// Number of calls each store operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub subscribes: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub batches: usize,
}

impl CallCounts {
    /// Total write calls (create, update, delete, batch).
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes + self.batches
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_writes: usize,
    fail_batches: bool,
}

/// Called with every collection's would-be contents before a write commits.
pub type CommitHook =
    Box<dyn Fn(&BTreeMap<String, Vec<Task>>) -> Result<(), StoreError> + Send + Sync>;

struct Subscriber {
    collection: String,
    direction: SortDirection,
    tx: mpsc::UnboundedSender<ListenerEvent>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, DocumentSet>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
    faults: Faults,
    calls: CallCounts,
    commit_hook: Option<CommitHook>,
}

impl Inner {
    /// Consumes one injected write failure, if any is pending.
    fn take_write_fault(&mut self) -> Result<(), StoreError> {
        if self.faults.fail_next_writes > 0 {
            self.faults.fail_next_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    /// Copy of `collection` for a write to work on.
    fn stage(&self, collection: &str) -> DocumentSet {
        self.collections.get(collection).cloned().unwrap_or_default()
    }

    /// Runs the commit hook against `staged`, then installs it and
    /// broadcasts. A hook failure leaves the collection untouched.
    fn commit(&mut self, collection: &str, staged: DocumentSet) -> Result<(), StoreError> {
        if let Some(hook) = &self.commit_hook {
            let mut view: BTreeMap<String, Vec<Task>> = self
                .collections
                .iter()
                .filter(|(name, _)| name.as_str() != collection)
                .map(|(name, set)| (name.clone(), set.snapshot(SortDirection::Ascending)))
                .collect();
            view.insert(
                collection.to_string(),
                staged.snapshot(SortDirection::Ascending),
            );
            hook(&view)?;
        }
        self.collections.insert(collection.to_string(), staged);
        self.broadcast(collection);
        Ok(())
    }

    fn broadcast(&mut self, collection: &str) {
        let set = self.collections.get(collection);
        self.subscribers.retain(|_, sub| {
            if sub.collection != collection {
                return true;
            }
            let tasks = set.map(|s| s.snapshot(sub.direction)).unwrap_or_default();
            sub.tx.send(ListenerEvent::Snapshot(tasks)).is_ok()
        });
    }
}

/// In-process [`RemoteStore`] implementation.
///
/// Cloning yields another handle to the same collections.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given collections.
    #[must_use]
    pub fn from_collections(collections: impl IntoIterator<Item = (String, Vec<Task>)>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for (name, tasks) in collections {
                inner.collections.insert(name, DocumentSet::from_tasks(tasks));
            }
        }
        store
    }

    /// Creates a store holding one pre-populated collection.
    #[must_use]
    pub fn with_collection(name: &str, tasks: Vec<Task>) -> Self {
        Self::from_collections([(name.to_string(), tasks)])
    }

    /// Installs a hook that must accept every write before it commits.
    #[must_use]
    pub fn with_commit_hook(self, hook: CommitHook) -> Self {
        self.inner.lock().commit_hook = Some(hook);
        self
    }

    /// Returns every collection in ascending display order.
    #[must_use]
    pub fn export(&self) -> BTreeMap<String, Vec<Task>> {
        let inner = self.inner.lock();
        inner
            .collections
            .iter()
            .map(|(name, set)| (name.clone(), set.snapshot(SortDirection::Ascending)))
            .collect()
    }

    /// Returns one collection in ascending display order.
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> Vec<Task> {
        let inner = self.inner.lock();
        inner
            .collections
            .get(collection)
            .map(|set| set.snapshot(SortDirection::Ascending))
            .unwrap_or_default()
    }

    /// Returns how many calls each operation has received so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    /// Number of live listeners across all collections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Makes the next `count` write calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().faults.fail_next_writes = count;
    }

    /// Makes every batch update fail until switched off again.
    pub fn fail_batches(&self, fail: bool) {
        self.inner.lock().faults.fail_batches = fail;
    }

    /// Reports an error to every listener and drops them.
    pub fn push_listener_error(&self, reason: &str) {
        let mut inner = self.inner.lock();
        for (_, sub) in inner.subscribers.drain() {
            let _ = sub.tx.send(ListenerEvent::Error(reason.to_string()));
        }
        tracing::debug!(reason, "injected listener error");
    }

    /// Re-sends the current snapshot of `collection` to its listeners.
    pub fn redeliver(&self, collection: &str) {
        self.inner.lock().broadcast(collection);
    }
}

impl RemoteStore for MemoryStore {
    async fn subscribe(
        &self,
        collection: &str,
        direction: SortDirection,
    ) -> Result<Listener, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_id = {
            let mut inner = self.inner.lock();
            inner.calls.subscribes += 1;
            inner.next_subscription += 1;
            let subscription_id = inner.next_subscription;

            let tasks = inner
                .collections
                .get(collection)
                .map(|set| set.snapshot(direction))
                .unwrap_or_default();
            let _ = tx.send(ListenerEvent::Snapshot(tasks));

            inner.subscribers.insert(
                subscription_id,
                Subscriber {
                    collection: collection.to_string(),
                    direction,
                    tx,
                },
            );
            subscription_id
        };
        tracing::debug!(collection, subscription_id, "memory listener added");

        let inner = Arc::clone(&self.inner);
        Ok(Listener::new(rx, move || {
            inner.lock().subscribers.remove(&subscription_id);
            tracing::debug!(subscription_id, "memory listener removed");
        }))
    }

    async fn create(&self, collection: &str, fields: TaskFields) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.lock();
        inner.calls.creates += 1;
        inner.take_write_fault()?;
        let mut staged = inner.stage(collection);
        let id = staged.create(fields)?;
        inner.commit(collection, staged)?;
        Ok(id)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.calls.updates += 1;
        inner.take_write_fault()?;
        if !inner.collections.contains_key(collection) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let mut staged = inner.stage(collection);
        staged.update(id, &patch)?;
        inner.commit(collection, staged)
    }

    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.calls.deletes += 1;
        inner.take_write_fault()?;
        let exists = inner
            .collections
            .get(collection)
            .is_some_and(|set| set.get(id).is_some());
        if !exists {
            return Ok(());
        }
        let mut staged = inner.stage(collection);
        staged.delete(id);
        inner.commit(collection, staged)
    }

    async fn batch_update(
        &self,
        collection: &str,
        writes: Vec<FieldWrite>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.calls.batches += 1;
        inner.take_write_fault()?;
        if inner.faults.fail_batches {
            return Err(StoreError::Unavailable("injected batch failure".to_string()));
        }
        if writes.is_empty() {
            return Ok(());
        }
        if !inner.collections.contains_key(collection) {
            return Err(StoreError::NotFound(writes[0].id.clone()));
        }
        let mut staged = inner.stage(collection);
        staged.batch(&writes)?;
        inner.commit(collection, staged)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }
}
