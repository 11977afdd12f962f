//! Role sets and fan-out.
//!
//! Each classified connection is registered under its role and gets a
//! bounded outbound queue. Fan-out never blocks: a connection whose queue
//! is closed is skipped, and one whose queue is full misses that frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::messages::ClientRole;

/// Default per-connection queue length.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Identifier of a registered connection.
pub type ClientId = u64;

type Clients = HashMap<ClientId, mpsc::Sender<String>>;

/// The set of live connections, by role.
pub struct RelayHub {
    next_id: AtomicU64,
    capacity: usize,
    esp: RwLock<Clients>,
    browsers: RwLock<Clients>,
}

impl RelayHub {
    /// Create a hub whose connections queue up to `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            esp: RwLock::new(HashMap::new()),
            browsers: RwLock::new(HashMap::new()),
        }
    }

    fn clients(&self, role: ClientRole) -> &RwLock<Clients> {
        match role {
            ClientRole::Esp => &self.esp,
            ClientRole::Browser => &self.browsers,
        }
    }

    /// Add a connection to `role`'s set.
    ///
    /// Frames fanned out to the connection arrive on the returned receiver.
    pub async fn register(&self, role: ClientRole) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.clients(role).write().await.insert(id, tx);
        debug!(client = id, %role, "Registered client");
        (id, rx)
    }

    /// Remove a connection. Returns whether it was registered.
    pub async fn unregister(&self, role: ClientRole, id: ClientId) -> bool {
        self.clients(role).write().await.remove(&id).is_some()
    }

    /// Send a browser command to every device connection.
    pub async fn forward_command(&self, text: &str) -> usize {
        self.broadcast(ClientRole::Esp, text).await
    }

    /// Send a sample batch to every browser connection.
    pub async fn forward_samples(&self, text: &str) -> usize {
        self.broadcast(ClientRole::Browser, text).await
    }

    /// Send `text` to every connection of `role`; returns how many took it.
    pub async fn broadcast(&self, role: ClientRole, text: &str) -> usize {
        let clients = self.clients(role).read().await;
        let mut delivered = 0;
        for (id, tx) in clients.iter() {
            match tx.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = *id, %role, "Client queue full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client = *id, %role, "Skipping closed client");
                }
            }
        }
        delivered
    }

    /// Number of connections registered under `role`.
    pub async fn count(&self, role: ClientRole) -> usize {
        self.clients(role).read().await.len()
    }

    /// Number of device connections.
    pub async fn esp_count(&self) -> usize {
        self.count(ClientRole::Esp).await
    }

    /// Number of browser connections.
    pub async fn browser_count(&self) -> usize {
        self.count(ClientRole::Browser).await
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
