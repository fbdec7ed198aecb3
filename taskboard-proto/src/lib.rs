//! Shared protocol definitions for the Taskboard document store.

pub mod codec;
pub mod collection;
pub mod task;
pub mod wire;
