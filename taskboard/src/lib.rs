//! Taskboard — task board client library.
//!
//! The [`sync::TaskSynchronizer`] keeps an ordered task list in step with a
//! [`store::RemoteStore`]: local edits are applied optimistically and every
//! snapshot from the store replaces local state wholesale.

pub mod config;
pub mod store;
pub mod sync;
pub mod view;
