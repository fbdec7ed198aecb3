//! Taskboard document store library.
//!
//! Exposes the store server for use in tests and embedding. The server
//! accepts WebSocket connections, applies document writes, and pushes
//! ordered snapshots to every listener of the written collection.

pub mod config;
pub mod server;
pub mod store;
