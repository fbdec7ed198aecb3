//! WebSocket client of the `taskboard-store` server.
//!
//! Implements [`RemoteStore`] over one WebSocket connection. Writes carry a
//! request id and wait for the matching reply; listeners carry a
//! subscription id and receive every snapshot the server pushes for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskboard_proto::codec;
use taskboard_proto::collection::SortDirection;
use taskboard_proto::task::{FieldWrite, TaskFields, TaskId, TaskPatch};
use taskboard_proto::wire::{MAX_FRAME_SIZE, StoreRequest, StoreResponse};

use super::{BackendType, Listener, ListenerEvent, RemoteStore, StoreError};

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the store server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a write to be acknowledged.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<StoreResponse>>>>;
type SubscriptionMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<ListenerEvent>>>>;

/// [`RemoteStore`] backed by a WebSocket connection to a store server.
pub struct WsStore {
    /// The store server URL (ws:// or wss://).
    url: String,
    /// Outbound frames, drained by the writer task.
    outbound: mpsc::UnboundedSender<Message>,
    /// Writes awaiting a reply, by request id.
    pending: PendingMap,
    /// Live listeners, by subscription id.
    subscriptions: SubscriptionMap,
    /// Source of request and subscription ids.
    next_id: AtomicU64,
    /// Whether the connection is still up.
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    /// Largest encoded request this client will send.
    max_frame_size: usize,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl WsStore {
    /// Connects with the default timeouts.
    ///
    /// # Errors
    ///
    /// See [`WsStore::connect_with_timeouts`].
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeouts(url, CONNECT_TIMEOUT, REQUEST_TIMEOUT).await
    }

    /// Connects to the store server at `url`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`] if the connection is not established in time.
    /// - [`StoreError::Unavailable`] if the server cannot be reached.
    pub async fn connect_with_timeouts(
        url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "store WebSocket connect timed out");
                StoreError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "store WebSocket connect failed");
                StoreError::Unavailable(format!("failed to connect to {url}: {e}"))
            })?;

        let (mut ws_sender, ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let connected = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

        let writer_connected = Arc::clone(&connected);
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    tracing::warn!(err = %e, "store send failed");
                    writer_connected.store(false, Ordering::Relaxed);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
            Arc::clone(&connected),
        ));

        tracing::info!(url, "connected to store server");

        Ok(Self {
            url: url.to_string(),
            outbound,
            pending,
            subscriptions,
            next_id: AtomicU64::new(1),
            connected,
            request_timeout,
            max_frame_size: MAX_FRAME_SIZE,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Overrides the largest request frame this client will send. Match it
    /// to the server's `max_frame_size`.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Return the store server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection to the server is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, request: &StoreRequest) -> Result<(), StoreError> {
        if !self.is_connected() {
            return Err(StoreError::ConnectionClosed);
        }
        let bytes = codec::encode_request(request)?;
        if bytes.len() > self.max_frame_size {
            tracing::warn!(
                size = bytes.len(),
                max = self.max_frame_size,
                "request exceeds frame limit, not sent"
            );
            return Err(StoreError::Rejected(format!(
                "request too large: {} bytes (max {})",
                bytes.len(),
                self.max_frame_size
            )));
        }
        self.outbound
            .send(Message::Binary(bytes.into()))
            .map_err(|_| StoreError::ConnectionClosed)
    }

    /// Sends a write and waits for its reply.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> StoreRequest + Send,
    ) -> Result<StoreResponse, StoreError> {
        let request_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        if let Err(e) = self.send(&build(request_id)) {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => match response {
                StoreResponse::Failed { reason, .. } => Err(StoreError::Rejected(reason)),
                other => Ok(other),
            },
            Ok(Err(_)) => Err(StoreError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!(request_id, "store request timed out");
                Err(StoreError::Timeout)
            }
        }
    }

    /// Sends a write whose only successful reply is `Ack`.
    async fn request_ack(
        &self,
        build: impl FnOnce(u64) -> StoreRequest + Send,
    ) -> Result<(), StoreError> {
        match self.request(build).await? {
            StoreResponse::Ack { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &StoreResponse) -> StoreError {
    tracing::warn!(?response, "unexpected store response");
    StoreError::Io(std::io::Error::other("unexpected store response"))
}

impl RemoteStore for WsStore {
    async fn subscribe(
        &self,
        collection: &str,
        direction: SortDirection,
    ) -> Result<Listener, StoreError> {
        let subscription_id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().insert(subscription_id, tx);

        let request = StoreRequest::Subscribe {
            subscription_id,
            collection: collection.to_string(),
            direction,
        };
        if let Err(e) = self.send(&request) {
            self.subscriptions.lock().remove(&subscription_id);
            return Err(e);
        }
        tracing::debug!(collection, subscription_id, "remote listener added");

        let subscriptions = Arc::clone(&self.subscriptions);
        let outbound = self.outbound.clone();
        Ok(Listener::new(rx, move || {
            subscriptions.lock().remove(&subscription_id);
            if let Ok(bytes) = codec::encode_request(&StoreRequest::Unsubscribe { subscription_id })
            {
                // The connection may already be gone; nothing left to release then.
                let _ = outbound.send(Message::Binary(bytes.into()));
            }
            tracing::debug!(subscription_id, "remote listener removed");
        }))
    }

    async fn create(&self, collection: &str, fields: TaskFields) -> Result<TaskId, StoreError> {
        let collection = collection.to_string();
        match self
            .request(|request_id| StoreRequest::Create {
                request_id,
                collection,
                fields,
            })
            .await?
        {
            StoreResponse::Created { id, .. } => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreError> {
        let collection = collection.to_string();
        let id = id.clone();
        self.request_ack(|request_id| StoreRequest::Update {
            request_id,
            collection,
            id,
            patch,
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), StoreError> {
        let collection = collection.to_string();
        let id = id.clone();
        self.request_ack(|request_id| StoreRequest::Delete {
            request_id,
            collection,
            id,
        })
        .await
    }

    async fn batch_update(
        &self,
        collection: &str,
        writes: Vec<FieldWrite>,
    ) -> Result<(), StoreError> {
        let collection = collection.to_string();
        self.request_ack(|request_id| StoreRequest::Batch {
            request_id,
            collection,
            writes,
        })
        .await
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Remote
    }
}

/// Request id of a write reply.
const fn reply_id(response: &StoreResponse) -> Option<u64> {
    match response {
        StoreResponse::Created { request_id, .. }
        | StoreResponse::Ack { request_id }
        | StoreResponse::Failed { request_id, .. } => Some(*request_id),
        StoreResponse::Snapshot { .. }
        | StoreResponse::SubscriptionFailed { .. }
        | StoreResponse::Error { .. } => None,
    }
}

/// Background task that reads server frames and dispatches them.
///
/// Replies complete the matching pending request; snapshots go to the
/// matching listener. Malformed frames are logged and skipped. When the
/// connection ends every listener receives an error and every pending
/// request fails with [`StoreError::ConnectionClosed`].
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: PendingMap,
    subscriptions: SubscriptionMap,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode_response(&data) {
                Ok(StoreResponse::Snapshot {
                    subscription_id,
                    tasks,
                }) => {
                    let subs = subscriptions.lock();
                    if let Some(tx) = subs.get(&subscription_id) {
                        let _ = tx.send(ListenerEvent::Snapshot(tasks));
                    } else {
                        tracing::debug!(subscription_id, "snapshot for released listener");
                    }
                }
                Ok(StoreResponse::SubscriptionFailed {
                    subscription_id,
                    reason,
                }) => {
                    if let Some(tx) = subscriptions.lock().remove(&subscription_id) {
                        let _ = tx.send(ListenerEvent::Error(reason));
                    }
                }
                Ok(StoreResponse::Error { reason }) => {
                    tracing::warn!(reason = %reason, "store server error");
                }
                Ok(response) => {
                    let request_id = reply_id(&response);
                    let tx = request_id.and_then(|id| pending.lock().remove(&id));
                    if let Some(tx) = tx {
                        let _ = tx.send(response);
                    } else {
                        tracing::debug!(?request_id, "reply for abandoned request");
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "store WebSocket read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    pending.lock().clear();
    for (_, tx) in subscriptions.lock().drain() {
        let _ = tx.send(ListenerEvent::Error("connection closed".to_string()));
    }
    tracing::info!("store reader task exiting");
}
