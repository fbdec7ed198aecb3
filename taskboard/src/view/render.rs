//! Plain-text rendering for the command-line front end.

use chrono::NaiveDate;
use taskboard_proto::task::{Task, TaskId};

use super::avatar;

/// Characters of a task id shown in listings.
pub const SHORT_ID_LEN: usize = 8;

/// One listing line: checkbox, short id, priority, title, people, due date.
#[must_use]
pub fn task_line(task: &Task, today: NaiveDate) -> String {
    let check = if task.is_completed { "x" } else { " " };
    let id = task.id.to_string();
    let short = id.get(..SHORT_ID_LEN).unwrap_or(&id);

    let mut line = format!(
        "[{check}] {short}  {:<6} {}  ({} -> {} [{}])",
        task.priority.to_string(),
        task.title,
        task.creator,
        task.assignee,
        avatar::initials(&task.assignee),
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!("  due {due}"));
        if task.is_overdue(today) {
            line.push_str(" OVERDUE");
        }
    }
    line
}

/// Footer line, e.g. `2 active tasks`.
#[must_use]
pub fn footer(active: usize) -> String {
    if active == 1 {
        "1 active task".to_string()
    } else {
        format!("{active} active tasks")
    }
}

/// Errors resolving a user-typed task reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdLookupError {
    #[error("no task matches {0}")]
    NoMatch(String),
    #[error("{0} matches more than one task")]
    Ambiguous(String),
}

/// Resolves a full id or a unique id prefix against `tasks`.
///
/// # Errors
///
/// Returns [`IdLookupError`] when nothing or more than one task matches.
pub fn resolve_id(tasks: &[Task], reference: &str) -> Result<TaskId, IdLookupError> {
    let reference = reference.trim();
    if let Ok(id) = reference.parse::<TaskId>()
        && tasks.iter().any(|t| t.id == id)
    {
        return Ok(id);
    }

    let needle = reference.to_ascii_lowercase();
    let mut matches = tasks
        .iter()
        .filter(|t| !needle.is_empty() && t.id.to_string().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id.clone()),
        (Some(_), Some(_)) => Err(IdLookupError::Ambiguous(reference.to_string())),
        (None, _) => Err(IdLookupError::NoMatch(reference.to_string())),
    }
}
