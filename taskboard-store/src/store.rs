//! Thread-safe collection registry backing the store server.
//!
//! [`DocumentStore`] keeps one [`DocumentSet`] per collection name.
//! Collections are created lazily on first write or subscribe.

use std::collections::HashMap;

use taskboard_proto::collection::{CollectionError, DocumentSet, SortDirection};
use taskboard_proto::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};
use tokio::sync::RwLock;

/// Default maximum number of documents per collection.
pub(crate) const DEFAULT_MAX_DOCUMENTS: usize = 10_000;

/// In-memory document collections keyed by name.
pub struct DocumentStore {
    collections: RwLock<HashMap<String, DocumentSet>>,
    max_documents: usize,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Creates an empty store with the default per-collection cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_documents(DEFAULT_MAX_DOCUMENTS)
    }

    /// Creates an empty store with a custom per-collection cap.
    #[must_use]
    pub fn with_max_documents(max_documents: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_documents,
        }
    }

    /// Creates a document and returns its new id.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Full`] if the collection is at its cap.
    pub async fn create(
        &self,
        collection: &str,
        fields: TaskFields,
    ) -> Result<TaskId, CollectionError> {
        let mut collections = self.collections.write().await;
        let max = self.max_documents;
        collections
            .entry(collection.to_string())
            .or_insert_with(|| DocumentSet::with_max_documents(max))
            .create(fields)
    }

    /// Updates fields of one document.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::NotFound`] if the document (or the whole
    /// collection) does not exist.
    pub async fn update(
        &self,
        collection: &str,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<(), CollectionError> {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(collection)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?
            .update(id, patch)
    }

    /// Deletes one document. Returns whether it existed.
    pub async fn delete(&self, collection: &str, id: &TaskId) -> bool {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(collection)
            .is_some_and(|set| set.delete(id))
    }

    /// Applies a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the first bad write; nothing is
    /// applied in that case.
    pub async fn batch(
        &self,
        collection: &str,
        writes: &[FieldWrite],
    ) -> Result<(), CollectionError> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection) {
            Some(set) => set.batch(writes),
            None => Err(CollectionError::NotFound(writes[0].id.clone())),
        }
    }

    /// Returns the ordered contents of a collection (empty if unknown).
    pub async fn snapshot(&self, collection: &str, direction: SortDirection) -> Vec<Task> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|set| set.snapshot(direction))
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, DocumentSet::len)
    }
}
