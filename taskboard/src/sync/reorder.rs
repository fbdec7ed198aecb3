//! Pure reorder planning.
//!
//! Turns "move task A to where task B is" into the new local sequence and
//! the set of `order` writes the store needs to match it.

use taskboard_proto::task::{FieldWrite, Task, TaskId, TaskPatch};

/// Result of planning a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    /// The list after the move, with `order == index` for every task.
    pub tasks: Vec<Task>,
    /// One write per task whose `order` changed.
    pub writes: Vec<FieldWrite>,
}

/// Removes the item at `from` and reinserts it at `to`.
///
/// Items between the two positions shift by one toward the vacated slot.
/// Out-of-range indices leave the slice untouched.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from >= items.len() || to >= items.len() || from == to {
        return;
    }
    let item = items.remove(from);
    items.insert(to, item);
}

/// Plans moving `from` to the position currently held by `to`.
///
/// Returns `None` when either id is absent or both resolve to the same
/// index.
#[must_use]
pub fn plan_reorder(tasks: &[Task], from: &TaskId, to: &TaskId) -> Option<ReorderPlan> {
    let from_idx = tasks.iter().position(|t| &t.id == from)?;
    let to_idx = tasks.iter().position(|t| &t.id == to)?;
    if from_idx == to_idx {
        return None;
    }

    let mut reordered = tasks.to_vec();
    move_item(&mut reordered, from_idx, to_idx);

    let mut writes = Vec::new();
    for (index, task) in reordered.iter_mut().enumerate() {
        let order = u32::try_from(index).unwrap_or(u32::MAX);
        if task.order != order {
            task.order = order;
            writes.push(FieldWrite::new(task.id.clone(), TaskPatch::order(order)));
        }
    }

    Some(ReorderPlan {
        tasks: reordered,
        writes,
    })
}
