//! Property-based tests for reorder planning.
//!
//! Uses proptest to verify:
//! 1. Any valid move yields orders `0..N-1` matching the new sequence.
//! 2. The new sequence is exactly a list move of the old one.
//! 3. Only tasks whose order changed are written.
//! 4. Unknown or identical ids plan nothing.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use taskboard::sync::{move_item, plan_reorder};
use taskboard_proto::task::{Priority, Task, TaskFields, TaskId};
use uuid::Uuid;

/// Tasks with distinct ids and arbitrary (possibly gapped) orders, sorted
/// the way a snapshot delivers them.
fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(0u32..1_000, 1..24).prop_map(|orders| {
        let mut tasks: Vec<Task> = orders
            .into_iter()
            .zip(0u128..)
            .map(|(order, n)| {
                Task::from_document(
                    TaskId::from_uuid(Uuid::from_u128(n + 1)),
                    TaskFields {
                        title: format!("task {n}"),
                        description: None,
                        creator: "alice".to_string(),
                        assignee: "bob".to_string(),
                        is_completed: false,
                        due_date: None,
                        priority: Priority::Medium,
                        created_at: u64::try_from(n).unwrap(),
                        order,
                    },
                )
            })
            .collect();
        tasks.sort_by(Task::cmp_display);
        tasks
    })
}

/// Tasks plus two distinct indices into them.
fn arb_move() -> impl Strategy<Value = (Vec<Task>, usize, usize)> {
    arb_tasks()
        .prop_filter("need two tasks", |tasks| tasks.len() >= 2)
        .prop_flat_map(|tasks| {
            let len = tasks.len();
            (Just(tasks), 0..len, 0..len)
        })
        .prop_filter("distinct positions", |(_, from, to)| from != to)
}

proptest! {
    #[test]
    fn orders_are_contiguous_after_move((tasks, from, to) in arb_move()) {
        let plan = plan_reorder(&tasks, &tasks[from].id, &tasks[to].id).unwrap();

        prop_assert_eq!(plan.tasks.len(), tasks.len());
        for (index, task) in plan.tasks.iter().enumerate() {
            prop_assert_eq!(usize::try_from(task.order).unwrap(), index);
        }
    }

    #[test]
    fn sequence_matches_list_move((tasks, from, to) in arb_move()) {
        let plan = plan_reorder(&tasks, &tasks[from].id, &tasks[to].id).unwrap();

        let mut expected: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        move_item(&mut expected, from, to);
        let actual: Vec<TaskId> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        prop_assert_eq!(actual, expected);

        // The moved task lands where the target was.
        prop_assert_eq!(&plan.tasks[to].id, &tasks[from].id);
    }

    #[test]
    fn writes_cover_exactly_the_changed_orders((tasks, from, to) in arb_move()) {
        let plan = plan_reorder(&tasks, &tasks[from].id, &tasks[to].id).unwrap();

        for task in &plan.tasks {
            let before = tasks.iter().find(|t| t.id == task.id).unwrap();
            let write = plan.writes.iter().find(|w| w.id == task.id);
            if before.order == task.order {
                prop_assert!(write.is_none());
            } else {
                let write = write.unwrap();
                prop_assert_eq!(write.patch.order, Some(task.order));
                prop_assert!(write.patch.title.is_none());
                prop_assert!(write.patch.is_completed.is_none());
            }
        }
    }

    #[test]
    fn unknown_or_equal_ids_plan_nothing(tasks in arb_tasks(), pick in any::<prop::sample::Index>()) {
        let id = &tasks[pick.index(tasks.len())].id;
        let stranger = TaskId::from_uuid(Uuid::from_u128(u128::MAX));

        prop_assert!(plan_reorder(&tasks, id, id).is_none());
        prop_assert!(plan_reorder(&tasks, &stranger, id).is_none());
        prop_assert!(plan_reorder(&tasks, id, &stranger).is_none());
    }

    #[test]
    fn move_item_preserves_elements(
        mut items in prop::collection::vec(any::<u16>(), 0..32),
        from in 0usize..40,
        to in 0usize..40,
    ) {
        let mut before = items.clone();
        move_item(&mut items, from, to);
        let mut after = items.clone();
        before.sort_unstable();
        after.sort_unstable();
        prop_assert_eq!(before, after);
    }
}
