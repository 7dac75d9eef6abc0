//! Client registry.
//!
//! Tracks the connected clients and fans relay messages out to them. Each
//! client has a bounded queue; when it is full the message is dropped for
//! that client only, so a slow or dead client never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;

use protocol::Message;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// Unique identifier for a client.
pub type ClientId = String;

/// Default queue depth for client output.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Statistics about a client's message handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Total messages queued successfully.
    pub messages_sent: u64,
    /// Messages dropped because the client's queue was full.
    pub messages_dropped: u64,
    /// Whether the client is currently experiencing backpressure.
    pub is_backpressured: bool,
}

/// A connected client's outbound queue.
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::Sender<Message>,
    stats: ClientStats,
}

impl ClientHandle {
    /// Creates a handle and the receiver that drains it.
    pub fn with_capacity(id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ClientHandle {
            id,
            tx,
            stats: ClientStats::default(),
        };
        (handle, rx)
    }

    /// Returns the client ID.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Returns a copy of the current statistics.
    pub fn stats(&self) -> ClientStats {
        self.stats.clone()
    }

    /// Queues a message without waiting.
    ///
    /// Returns true if the message was queued, false if dropped.
    fn try_send(&mut self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                if self.stats.is_backpressured {
                    self.stats.is_backpressured = false;
                    tracing::debug!(client_id = %self.id, "Client recovered from backpressure");
                }
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.messages_dropped += 1;
                if !self.stats.is_backpressured {
                    self.stats.is_backpressured = true;
                    tracing::warn!(
                        client_id = %self.id,
                        dropped = self.stats.messages_dropped,
                        "Client is backpressured, dropping messages"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(client_id = %self.id, "Client channel closed");
                false
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The set of connected clients.
///
/// Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    capacity: usize,
}

impl ClientRegistry {
    /// Creates an empty registry whose clients get `capacity`-deep queues.
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Registers a client and returns the receiver for its messages.
    ///
    /// Registering an existing ID replaces the previous handle.
    pub async fn add(&self, client_id: ClientId) -> mpsc::Receiver<Message> {
        let (handle, rx) = ClientHandle::with_capacity(client_id.clone(), self.capacity);
        let mut clients = self.clients.write().await;
        clients.insert(client_id.clone(), handle);
        tracing::debug!(client_id = %client_id, clients = clients.len(), "Registered client");
        rx
    }

    /// Unregisters a client, returning its statistics if it was present.
    pub async fn remove(&self, client_id: &str) -> Option<ClientStats> {
        let mut clients = self.clients.write().await;
        clients.remove(client_id).map(|h| h.stats())
    }

    /// Returns the number of registered clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Returns whether no clients are registered.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Returns the IDs of all registered clients.
    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Returns statistics for one client.
    pub async fn client_stats(&self, client_id: &str) -> Option<ClientStats> {
        self.clients.read().await.get(client_id).map(|h| h.stats())
    }

    /// Queues `msg` for every client.
    ///
    /// Clients whose receiver is gone are removed. Returns the number of
    /// clients the message was queued for.
    pub async fn broadcast(&self, msg: Message) -> usize {
        let mut clients = self.clients.write().await;
        let mut disconnected = Vec::new();
        let mut success_count = 0;

        for (client_id, handle) in clients.iter_mut() {
            if handle.is_closed() {
                disconnected.push(client_id.clone());
                continue;
            }

            if handle.try_send(msg.clone()) {
                success_count += 1;
            }
        }

        for client_id in disconnected {
            clients.remove(&client_id);
            tracing::debug!(client_id = %client_id, "Removed disconnected client");
        }

        success_count
    }

    /// Queues `msg` for a single client.
    ///
    /// Returns false if the client is unknown or the message was dropped.
    pub async fn send_to(&self, client_id: &str, msg: Message) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(client_id) {
            Some(handle) if handle.is_closed() => {
                clients.remove(client_id);
                tracing::debug!(client_id = %client_id, "Removed disconnected client");
                false
            }
            Some(handle) => handle.try_send(msg),
            None => false,
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
