//! Store server core: shared state, WebSocket handler, listener registry,
//! and snapshot broadcast.
//!
//! Each connection may hold any number of listeners, keyed by the
//! client-chosen subscription id. After every committed write the server
//! pushes a fresh ordered snapshot to every listener of the written
//! collection, including the writer's own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::codec;
use taskboard_proto::collection::SortDirection;
use taskboard_proto::wire::{MAX_FRAME_SIZE, StoreRequest, StoreResponse};
use tokio::sync::{RwLock, mpsc};

use crate::store::DocumentStore;

/// Identifies one listener: the connection it lives on plus the
/// subscription id that connection chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    /// Server-assigned connection number.
    pub connection: u64,
    /// Client-assigned subscription id.
    pub subscription_id: u64,
}

/// A registered snapshot listener.
struct ListenerEntry {
    direction: SortDirection,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared server state holding the documents and the listener registry.
pub struct ServerState {
    /// Document collections.
    pub store: DocumentStore,
    /// Collection name -> listeners of that collection.
    listeners: RwLock<HashMap<String, HashMap<ListenerKey, ListenerEntry>>>,
    /// Source of connection numbers.
    next_connection: AtomicU64,
    /// Maximum allowed inbound frame size in bytes.
    max_frame_size: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates server state with an empty store and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MAX_FRAME_SIZE, DocumentStore::new())
    }

    /// Creates server state with a custom frame size limit and store.
    #[must_use]
    pub fn with_config(max_frame_size: usize, store: DocumentStore) -> Self {
        Self {
            store,
            listeners: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            max_frame_size,
        }
    }

    /// Registers a listener and queues the current snapshot for it.
    ///
    /// Registration and the initial snapshot happen under the registry lock,
    /// so no broadcast can slip between them and arrive out of order.
    pub async fn add_listener(
        &self,
        collection: &str,
        key: ListenerKey,
        direction: SortDirection,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        let mut listeners = self.listeners.write().await;
        let tasks = self.store.snapshot(collection, direction).await;
        send_response(
            &sender,
            &StoreResponse::Snapshot {
                subscription_id: key.subscription_id,
                tasks,
            },
        );
        listeners
            .entry(collection.to_string())
            .or_default()
            .insert(key, ListenerEntry { direction, sender });
    }

    /// Removes one listener. Returns whether it existed.
    pub async fn remove_listener(&self, key: ListenerKey) -> bool {
        let mut listeners = self.listeners.write().await;
        let mut removed = false;
        for entries in listeners.values_mut() {
            removed |= entries.remove(&key).is_some();
        }
        listeners.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Removes every listener owned by a connection, returning how many.
    pub async fn remove_connection(&self, connection: u64) -> usize {
        let mut listeners = self.listeners.write().await;
        let mut removed = 0;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|key, _| key.connection != connection);
            removed += before - entries.len();
        }
        listeners.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Number of live listeners on a collection.
    pub async fn listener_count(&self, collection: &str) -> usize {
        let listeners = self.listeners.read().await;
        listeners.get(collection).map_or(0, HashMap::len)
    }

    /// Pushes the current snapshot to every listener of `collection`.
    ///
    /// Takes the registry write lock so deliveries are serialized and each
    /// listener sees snapshots in commit order. Listeners whose channel is
    /// closed are dropped.
    pub async fn broadcast(&self, collection: &str) {
        let mut listeners = self.listeners.write().await;
        let Some(entries) = listeners.get_mut(collection) else {
            return;
        };
        let ascending = self.store.snapshot(collection, SortDirection::Ascending).await;
        let mut descending: Option<Vec<_>> = None;

        entries.retain(|key, entry| {
            let tasks = match entry.direction {
                SortDirection::Ascending => ascending.clone(),
                SortDirection::Descending => descending
                    .get_or_insert_with(|| ascending.iter().rev().cloned().collect())
                    .clone(),
            };
            let delivered = send_response(
                &entry.sender,
                &StoreResponse::Snapshot {
                    subscription_id: key.subscription_id,
                    tasks,
                },
            );
            if !delivered {
                tracing::debug!(
                    connection = key.connection,
                    subscription_id = key.subscription_id,
                    "dropping listener with closed channel"
                );
            }
            delivered
        });

        tracing::debug!(
            collection = %collection,
            listeners = entries.len(),
            documents = ascending.len(),
            "snapshot broadcast"
        );
    }

    fn next_connection_id(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Assign a connection number.
/// 2. Spawn a writer task fed by an unbounded channel.
/// 3. Read and apply requests until the peer closes.
/// 4. Drop every listener the connection registered.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let connection = state.next_connection_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tracing::info!(connection, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(connection, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(connection, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let dropped = state.remove_connection(connection).await;
    tracing::info!(connection, listeners = dropped, "client disconnected");
}

/// Decodes and applies one inbound frame.
async fn handle_binary_message(
    connection: u64,
    data: &[u8],
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    if data.len() > state.max_frame_size {
        tracing::warn!(
            connection,
            size = data.len(),
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        let reason = format!(
            "frame too large: {} bytes (max {})",
            data.len(),
            state.max_frame_size
        );
        // Fail the write itself when it can be identified, so the client
        // is not left waiting for a reply.
        match codec::decode_request(data).ok().and_then(|r| r.request_id()) {
            Some(request_id) => reject(connection, tx, request_id, &reason),
            None => {
                send_response(tx, &StoreResponse::Error { reason });
            }
        }
        return;
    }

    let request = match codec::decode_request(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(connection, error = %e, "failed to decode request");
            send_response(
                tx,
                &StoreResponse::Error {
                    reason: format!("malformed request: {e}"),
                },
            );
            return;
        }
    };

    tracing::trace!(connection, request_id = ?request.request_id(), "request received");
    handle_request(connection, request, state, tx).await;
}

/// Applies a decoded request, replies to the sender, and broadcasts a
/// snapshot after every committed write.
async fn handle_request(
    connection: u64,
    request: StoreRequest,
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    match request {
        StoreRequest::Subscribe {
            subscription_id,
            collection,
            direction,
        } => {
            let key = ListenerKey {
                connection,
                subscription_id,
            };
            state
                .add_listener(&collection, key, direction, tx.clone())
                .await;
            tracing::info!(connection, subscription_id, collection = %collection, "listener added");
        }
        StoreRequest::Unsubscribe { subscription_id } => {
            let existed = state
                .remove_listener(ListenerKey {
                    connection,
                    subscription_id,
                })
                .await;
            tracing::info!(connection, subscription_id, existed, "listener removed");
        }
        StoreRequest::Create {
            request_id,
            collection,
            fields,
        } => match state.store.create(&collection, fields).await {
            Ok(id) => {
                tracing::debug!(connection, collection = %collection, id = %id, "document created");
                send_response(tx, &StoreResponse::Created { request_id, id });
                state.broadcast(&collection).await;
            }
            Err(e) => reject(connection, tx, request_id, &e),
        },
        StoreRequest::Update {
            request_id,
            collection,
            id,
            patch,
        } => match state.store.update(&collection, &id, &patch).await {
            Ok(()) => {
                tracing::debug!(connection, collection = %collection, id = %id, "document updated");
                send_response(tx, &StoreResponse::Ack { request_id });
                state.broadcast(&collection).await;
            }
            Err(e) => reject(connection, tx, request_id, &e),
        },
        StoreRequest::Delete {
            request_id,
            collection,
            id,
        } => {
            let existed = state.store.delete(&collection, &id).await;
            tracing::debug!(connection, collection = %collection, id = %id, existed, "document deleted");
            send_response(tx, &StoreResponse::Ack { request_id });
            if existed {
                state.broadcast(&collection).await;
            }
        }
        StoreRequest::Batch {
            request_id,
            collection,
            writes,
        } => match state.store.batch(&collection, &writes).await {
            Ok(()) => {
                tracing::debug!(connection, collection = %collection, writes = writes.len(), "batch committed");
                send_response(tx, &StoreResponse::Ack { request_id });
                if !writes.is_empty() {
                    state.broadcast(&collection).await;
                }
            }
            Err(e) => reject(connection, tx, request_id, &e),
        },
    }
}

/// Replies with [`StoreResponse::Failed`] for a rejected write.
fn reject(
    connection: u64,
    tx: &mpsc::UnboundedSender<Message>,
    request_id: u64,
    error: &impl std::fmt::Display,
) {
    tracing::warn!(connection, request_id, error = %error, "request rejected");
    send_response(
        tx,
        &StoreResponse::Failed {
            request_id,
            reason: error.to_string(),
        },
    );
}

/// Encodes a response and queues it on a connection's writer channel.
///
/// Returns `false` if the channel is closed.
fn send_response(tx: &mpsc::UnboundedSender<Message>, response: &StoreResponse) -> bool {
    match codec::encode_response(response) {
        Ok(bytes) => tx.send(Message::Binary(bytes.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            true
        }
    }
}

/// Starts the store server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the store server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "store server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the store server in-process for testing.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
