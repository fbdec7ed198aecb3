//! Remote store abstraction for Taskboard.
//!
//! Defines the [`RemoteStore`] trait the synchronizer writes through and
//! listens on. Concrete implementations:
//! - [`memory::MemoryStore`] — in-process collections with fault injection for tests
//! - [`local::LocalStore`] — collections persisted to a JSON file
//! - [`remote::WsStore`] — WebSocket client of the `taskboard-store` server

pub mod local;
pub mod memory;
pub mod remote;

use std::fmt;

use taskboard_proto::codec::CodecError;
use taskboard_proto::collection::{CollectionError, SortDirection};
use taskboard_proto::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};
use tokio::sync::mpsc;

/// Describes which kind of store backs a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process collections, gone when the process exits.
    Memory,
    /// JSON file on local disk.
    Local,
    /// Remote document store over WebSocket.
    Remote,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::Local => write!(f, "Local"),
            Self::Remote => write!(f, "Remote"),
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write; nothing was applied.
    #[error("store rejected write: {0}")]
    Rejected(String),

    /// The targeted document does not exist.
    #[error("document {0} not found")]
    NotFound(TaskId),

    /// The operation timed out before the store answered.
    #[error("store operation timed out")]
    Timeout,

    /// The connection to the store has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CollectionError> for StoreError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::NotFound(id) => Self::NotFound(id),
            other @ (CollectionError::Full { .. } | CollectionError::EmptyPatch(_)) => {
                Self::Rejected(other.to_string())
            }
        }
    }
}

/// Something a live listener reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Full ordered contents of the collection.
    Snapshot(Vec<Task>),
    /// The listener failed and will deliver nothing further.
    Error(String),
}

/// Releases a listener registration exactly once.
///
/// Runs its release action on [`ListenerGuard::release`] or on drop,
/// whichever comes first.
pub struct ListenerGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerGuard {
    /// Wraps a release action.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Runs the release action if it has not run yet.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Returns `true` until the release action has run.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A live, ordered subscription to one collection.
///
/// Dropping the listener unsubscribes it.
#[derive(Debug)]
pub struct Listener {
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    guard: ListenerGuard,
}

impl Listener {
    /// Creates a listener from its event channel and release action.
    pub fn new(
        events: mpsc::UnboundedReceiver<ListenerEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            guard: ListenerGuard::new(release),
        }
    }

    /// Waits for the next event. Returns `None` once the store side has
    /// gone away.
    pub async fn next(&mut self) -> Option<ListenerEvent> {
        self.events.recv().await
    }

    /// Stops the listener. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.guard.release();
    }

    /// Returns `true` until [`Listener::unsubscribe`] has been called.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.guard.is_active()
    }

    /// Splits the listener so the event stream and the release guard can be
    /// owned by different tasks.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ListenerEvent>, ListenerGuard) {
        (self.events, self.guard)
    }
}

/// Async document store the synchronizer writes through and listens on.
///
/// Implementations own id assignment and the atomicity of
/// [`RemoteStore::batch_update`]. Listeners report the full ordered
/// collection after every committed write; implementations never push
/// partial diffs.
pub trait RemoteStore: Send + Sync + 'static {
    /// Starts a live listener on `collection`, ordered by `order`.
    fn subscribe(
        &self,
        collection: &str,
        direction: SortDirection,
    ) -> impl std::future::Future<Output = Result<Listener, StoreError>> + Send;

    /// Creates a document and returns the id the store assigned.
    fn create(
        &self,
        collection: &str,
        fields: TaskFields,
    ) -> impl std::future::Future<Output = Result<TaskId, StoreError>> + Send;

    /// Updates some fields of one existing document.
    fn update_fields(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Deletes one document. Deleting a missing document succeeds.
    fn delete(
        &self,
        collection: &str,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Applies every write or none of them.
    fn batch_update(
        &self,
        collection: &str,
        writes: Vec<FieldWrite>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Return the type of this store.
    fn backend_type(&self) -> BackendType;
}
