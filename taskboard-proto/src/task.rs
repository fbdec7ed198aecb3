//! Task document model for Taskboard.
//!
//! A [`Task`] is one document in a store collection. The store assigns the
//! [`TaskId`] on creation; every other field travels as [`TaskFields`] on
//! create and as a [`TaskPatch`] on partial updates.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Store-assigned task identifier, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Task priority, shown as a badge next to the title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// The persisted document body: every task field except the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub creator: String,
    pub assignee: String,
    pub is_completed: bool,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    /// Milliseconds since epoch, set once at creation.
    pub created_at: u64,
    /// Display position within the collection.
    pub order: u32,
}

/// A task document as reported by a store snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier assigned by the store.
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    /// Who added the task (display only).
    pub creator: String,
    /// Who the task is assigned to (display only).
    pub assignee: String,
    pub is_completed: bool,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    /// Milliseconds since epoch, set once at creation.
    pub created_at: u64,
    /// Display position. Only meaningful for sorting.
    pub order: u32,
}

impl Task {
    /// Builds a task from its store-assigned id and document body.
    #[must_use]
    pub fn from_document(id: TaskId, fields: TaskFields) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            creator: fields.creator,
            assignee: fields.assignee,
            is_completed: fields.is_completed,
            due_date: fields.due_date,
            priority: fields.priority,
            created_at: fields.created_at,
            order: fields.order,
        }
    }

    /// Returns `true` when the task has a due date before `today` and is
    /// still open.
    #[must_use]
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_completed && self.due_date.is_some_and(|due| due < today)
    }

    /// Snapshot ordering: `order`, then creation time, then id.
    ///
    /// Two clients racing on reorders can briefly leave duplicate `order`
    /// values; the tie-breakers keep every subscriber's sequence identical.
    #[must_use]
    pub fn cmp_display(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then(self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A partial field update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub is_completed: Option<bool>,
    pub order: Option<u32>,
}

impl TaskPatch {
    /// Patch that only sets the title.
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Patch that only sets the completion flag.
    #[must_use]
    pub fn completed(is_completed: bool) -> Self {
        Self {
            is_completed: Some(is_completed),
            ..Self::default()
        }
    }

    /// Patch that only sets the display order.
    #[must_use]
    pub fn order(order: u32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.is_completed.is_none() && self.order.is_none()
    }

    /// Applies the set fields to `task`.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(is_completed) = self.is_completed {
            task.is_completed = is_completed;
        }
        if let Some(order) = self.order {
            task.order = order;
        }
    }
}

/// One document write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWrite {
    pub id: TaskId,
    pub patch: TaskPatch,
}

impl FieldWrite {
    #[must_use]
    pub const fn new(id: TaskId, patch: TaskPatch) -> Self {
        Self { id, patch }
    }
}

/// User input for a new task, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub creator: String,
    pub assignee: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
}

impl TaskDraft {
    /// Creates a draft with the required fields and default priority.
    pub fn new(
        title: impl Into<String>,
        creator: impl Into<String>,
        assignee: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            creator: creator.into(),
            assignee: assignee.into(),
            ..Self::default()
        }
    }

    /// Converts the draft into a document body.
    ///
    /// Text fields are trimmed and a blank description becomes `None`.
    /// The new task starts incomplete.
    #[must_use]
    pub fn into_fields(self, created_at: u64, order: u32) -> TaskFields {
        let description = self.description.trim();
        TaskFields {
            title: self.title.trim().to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            creator: self.creator.trim().to_string(),
            assignee: self.assignee.trim().to_string(),
            is_completed: false,
            due_date: self.due_date,
            priority: self.priority,
            created_at,
            order,
        }
    }
}
