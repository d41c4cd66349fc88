//! Per-client WebSocket connection state and the connection registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use courier_core::AccountId;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::WS_DROPPED_FRAMES_TOTAL;

/// One connected command client.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: String,
    /// Account bound by the first authenticated command.
    account: Mutex<Option<AccountId>>,
    /// Channel to this connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Set on every pong or inbound frame, swapped out by the heartbeat.
    is_alive: AtomicBool,
    /// Frames dropped on a full channel.
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            account: Mutex::new(None),
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Bind this connection to an account. Later commands may rebind.
    pub fn bind_account(&self, id: AccountId) {
        *self.account.lock() = Some(id);
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account.lock().clone()
    }

    /// Queue a text frame for the write task.
    ///
    /// Returns `false` when the channel is full or closed; the frame is
    /// dropped and counted rather than blocking the caller.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            counter!(WS_DROPPED_FRAMES_TOTAL).increment(1);
            false
        }
    }

    /// Serialize and queue a JSON payload.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record liveness (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag. Returns whether the client showed
    /// life since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

/// All currently connected command clients.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ClientConnection>>,
    send_queue: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            send_queue,
        }
    }

    /// Register a new connection; returns it with the write-task receiver.
    pub fn register(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let id = format!("conn_{}", Uuid::now_v7());
        let (tx, rx) = mpsc::channel(self.send_queue);
        let conn = Arc::new(ClientConnection::new(id.clone(), tx));
        let _ = self.connections.insert(id, conn.clone());
        (conn, rx)
    }

    pub fn unregister(&self, id: &str) {
        let _ = self.connections.remove(id);
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}
