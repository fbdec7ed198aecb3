//! Status and search filtering.

use std::fmt;
use std::str::FromStr;

use taskboard_proto::task::Task;

/// Which tasks to show by completion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    /// Returns `true` if `task` passes this filter.
    #[must_use]
    pub const fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.is_completed,
            Self::Completed => task.is_completed,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

/// A status filter combined with free-text search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: StatusFilter,
    /// Case-insensitive substring; empty matches everything.
    pub search: String,
}

impl TaskQuery {
    #[must_use]
    pub fn new(status: StatusFilter, search: impl Into<String>) -> Self {
        Self {
            status,
            search: search.into(),
        }
    }

    /// Returns `true` if `task` passes both the status filter and the
    /// search.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task) && matches_search(task, &self.search.to_lowercase())
    }
}

/// `needle` must already be lower-cased.
fn matches_search(task: &Task, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let hit = |text: &str| text.to_lowercase().contains(needle);
    hit(&task.title)
        || task.description.as_deref().is_some_and(hit)
        || hit(&task.creator)
        || hit(&task.assignee)
}

/// The subsequence of `tasks` matching `query`, in the original order.
#[must_use]
pub fn filter_tasks(tasks: &[Task], query: &TaskQuery) -> Vec<Task> {
    let needle = query.search.to_lowercase();
    tasks
        .iter()
        .filter(|t| query.status.matches(t) && matches_search(t, &needle))
        .cloned()
        .collect()
}

/// Number of tasks not yet completed.
#[must_use]
pub fn active_count(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| !t.is_completed).count()
}
