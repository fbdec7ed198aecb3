//! Wire protocol between Taskboard clients and the document store server.
//!
//! Every WebSocket binary frame carries exactly one postcard-encoded
//! [`StoreRequest`] (client to server) or [`StoreResponse`] (server to
//! client). Requests that expect an answer carry a client-chosen
//! `request_id`; snapshot traffic is keyed by a client-chosen
//! `subscription_id`.

use serde::{Deserialize, Serialize};

use crate::collection::SortDirection;
use crate::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};

/// Default limit on one encoded request frame, in bytes.
///
/// A batch that rewrites the order of every document in a full collection
/// (10 000 documents) must fit.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Messages sent from a client to the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreRequest {
    /// Start a live, ordered listener on a collection.
    ///
    /// The server answers with an immediate [`StoreResponse::Snapshot`] and
    /// sends a new one after every committed write to the collection.
    Subscribe {
        subscription_id: u64,
        collection: String,
        direction: SortDirection,
    },
    /// Stop a listener. Unknown ids are ignored.
    Unsubscribe { subscription_id: u64 },
    /// Create a document; answered with [`StoreResponse::Created`].
    Create {
        request_id: u64,
        collection: String,
        fields: TaskFields,
    },
    /// Update fields of one document; answered with [`StoreResponse::Ack`].
    Update {
        request_id: u64,
        collection: String,
        id: TaskId,
        patch: TaskPatch,
    },
    /// Delete one document; answered with [`StoreResponse::Ack`].
    Delete {
        request_id: u64,
        collection: String,
        id: TaskId,
    },
    /// Apply all writes atomically; answered with [`StoreResponse::Ack`].
    Batch {
        request_id: u64,
        collection: String,
        writes: Vec<FieldWrite>,
    },
}

impl StoreRequest {
    /// Returns the request id for messages that expect a reply.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::Create { request_id, .. }
            | Self::Update { request_id, .. }
            | Self::Delete { request_id, .. }
            | Self::Batch { request_id, .. } => Some(*request_id),
            Self::Subscribe { .. } | Self::Unsubscribe { .. } => None,
        }
    }
}

/// Messages sent from the document store to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreResponse {
    /// Full ordered contents of a subscribed collection.
    Snapshot {
        subscription_id: u64,
        tasks: Vec<Task>,
    },
    /// A document was created with the given id.
    Created { request_id: u64, id: TaskId },
    /// An update, delete, or batch was committed.
    Ack { request_id: u64 },
    /// A request was rejected; nothing was written.
    Failed { request_id: u64, reason: String },
    /// A listener can no longer deliver snapshots.
    SubscriptionFailed { subscription_id: u64, reason: String },
    /// Connection-level error not tied to a request.
    Error { reason: String },
}
