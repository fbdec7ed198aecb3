//! In-memory document collection semantics shared by every store backend.
//!
//! [`DocumentSet`] implements the store contract the synchronizer relies on:
//! the store assigns ids, `update` fails for unknown documents, `delete` is
//! idempotent, and `batch` applies all of its writes or none of them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};

/// Sort direction for ordered snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Errors returned by [`DocumentSet`] operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CollectionError {
    /// No document with this id exists.
    #[error("document not found: {0}")]
    NotFound(TaskId),
    /// The collection already holds the maximum number of documents.
    #[error("collection is full (max {max} documents)")]
    Full {
        /// Configured document cap.
        max: usize,
    },
    /// An update carried no fields.
    #[error("update for {0} has no fields")]
    EmptyPatch(TaskId),
}

/// A collection of task documents keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    docs: HashMap<TaskId, Task>,
    max_documents: Option<usize>,
}

impl DocumentSet {
    /// Creates an empty, unbounded collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty collection capped at `max_documents`.
    #[must_use]
    pub fn with_max_documents(max_documents: usize) -> Self {
        Self {
            docs: HashMap::new(),
            max_documents: Some(max_documents),
        }
    }

    /// Builds a collection from previously persisted tasks.
    ///
    /// Later duplicates of the same id replace earlier ones.
    #[must_use]
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            docs: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            max_documents: None,
        }
    }

    /// Number of documents in the collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns `true` if the collection holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Looks up a document by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.docs.get(id)
    }

    /// Inserts a new document and returns its freshly assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Full`] if the document cap is reached.
    pub fn create(&mut self, fields: TaskFields) -> Result<TaskId, CollectionError> {
        if let Some(max) = self.max_documents
            && self.docs.len() >= max
        {
            return Err(CollectionError::Full { max });
        }
        let id = TaskId::new();
        self.docs
            .insert(id.clone(), Task::from_document(id.clone(), fields));
        Ok(id)
    }

    /// Applies a partial update to one document.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::NotFound`] for an unknown id, or
    /// [`CollectionError::EmptyPatch`] if the patch sets no field.
    pub fn update(&mut self, id: &TaskId, patch: &TaskPatch) -> Result<(), CollectionError> {
        if patch.is_empty() {
            return Err(CollectionError::EmptyPatch(id.clone()));
        }
        let task = self
            .docs
            .get_mut(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        patch.apply(task);
        Ok(())
    }

    /// Removes a document. Returns whether it existed.
    pub fn delete(&mut self, id: &TaskId) -> bool {
        self.docs.remove(id).is_some()
    }

    /// Applies every write, or none of them.
    ///
    /// All targets are checked before the first write lands, so a missing
    /// document leaves the collection untouched.
    ///
    /// # Errors
    ///
    /// Returns the first [`CollectionError`] found while validating.
    pub fn batch(&mut self, writes: &[FieldWrite]) -> Result<(), CollectionError> {
        for write in writes {
            if write.patch.is_empty() {
                return Err(CollectionError::EmptyPatch(write.id.clone()));
            }
            if !self.docs.contains_key(&write.id) {
                return Err(CollectionError::NotFound(write.id.clone()));
            }
        }
        for write in writes {
            if let Some(task) = self.docs.get_mut(&write.id) {
                write.patch.apply(task);
            }
        }
        Ok(())
    }

    /// Returns every document sorted for display.
    #[must_use]
    pub fn snapshot(&self, direction: SortDirection) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.docs.values().cloned().collect();
        tasks.sort_by(Task::cmp_display);
        if direction == SortDirection::Descending {
            tasks.reverse();
        }
        tasks
    }
}
