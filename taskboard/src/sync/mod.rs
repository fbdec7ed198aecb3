//! Task list synchronization against a [`RemoteStore`](crate::store::RemoteStore).
//!
//! The local list is a write-ahead cache: reorders are applied locally
//! before the store confirms them, and every snapshot from the store
//! replaces the local list wholesale ("snapshot wins"). Adds and deletes are
//! not applied locally; they show up with the next snapshot.

pub mod manager;
pub mod reorder;

pub use manager::{SyncHandle, TaskSynchronizer};
pub use reorder::{ReorderPlan, move_item, plan_reorder};

use taskboard_proto::task::{TaskDraft, TaskId};
use thiserror::Error;

use crate::store::StoreError;

/// Reasons a draft or title is refused before reaching the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Task title is empty after trimming.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long ({len} characters, max {max})")]
    TitleTooLong { len: usize, max: usize },
    /// Creator is empty after trimming.
    #[error("creator cannot be empty")]
    CreatorEmpty,
    /// Assignee is empty after trimming.
    #[error("assignee cannot be empty")]
    AssigneeEmpty,
}

/// Errors returned by synchronizer operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The input was refused; the store was not called.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    /// The store refused or failed the write.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    /// No task with this id is in the local list.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// Another reorder is still waiting for the store.
    #[error("a reorder is already in flight")]
    ReorderInFlight,
}

/// What a call to [`TaskSynchronizer::reorder`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    /// An id was unknown or both ids named the same position.
    Skipped,
    /// The move was applied and the store accepted `writes` order changes.
    Applied { writes: usize },
}

/// Notifications emitted by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A snapshot replaced the local list.
    Snapshot {
        /// Number of tasks in the snapshot.
        tasks: usize,
        /// The snapshot cleared a pending drift.
        drift_resolved: bool,
    },
    /// A reorder batch failed; local order differs from the store until
    /// the next snapshot.
    Drift { reason: String },
    /// The listener stopped; subscribe again to recover.
    ListenerFailed { reason: String },
}

/// Checks a title: non-empty after trimming and at most `max_len` characters.
///
/// # Errors
///
/// Returns [`ValidationError::TitleEmpty`] or [`ValidationError::TitleTooLong`].
pub fn validate_title(title: &str, max_len: usize) -> Result<(), ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::TitleEmpty);
    }
    let len = title.chars().count();
    if len > max_len {
        return Err(ValidationError::TitleTooLong { len, max: max_len });
    }
    Ok(())
}

/// Checks every required field of a draft.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found, checking title, creator,
/// then assignee.
pub fn validate_draft(draft: &TaskDraft, max_title_len: usize) -> Result<(), ValidationError> {
    validate_title(&draft.title, max_title_len)?;
    if draft.creator.trim().is_empty() {
        return Err(ValidationError::CreatorEmpty);
    }
    if draft.assignee.trim().is_empty() {
        return Err(ValidationError::AssigneeEmpty);
    }
    Ok(())
}
