//! Presentation projections over the synchronized task list.
//!
//! Everything here is pure: it takes the current list and returns what a
//! front end should show.

pub mod avatar;
pub mod filter;
pub mod render;

pub use filter::{StatusFilter, TaskQuery, active_count, filter_tasks};
