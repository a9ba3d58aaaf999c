//! Live display connections and message fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_core::{BroadcastMessage, ConnectionId, DisplayId, DisplayInfo, DisplaySummary, TagSet};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Serialized frame shared by every recipient of one broadcast.
pub type Frame = Arc<String>;

/// Result of handing a frame to one display's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full; the frame was dropped for this display only.
    Dropped,
    /// Stream already gone.
    Closed,
}

/// One open push channel.
pub struct DisplayConnection {
    pub info: DisplayInfo,
    pub tags: TagSet,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    /// Taken on close so the receiving stream ends after draining.
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    dropped_messages: AtomicU64,
}

impl DisplayConnection {
    fn new(info: DisplayInfo, tags: TagSet, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            info,
            tags,
            connection_id: ConnectionId::new(),
            connected_at: Utc::now(),
            tx: Mutex::new(Some(tx)),
            dropped_messages: AtomicU64::new(0),
        }
    }

    pub fn display_id(&self) -> &DisplayId {
        &self.info.display_id
    }

    pub fn send(&self, frame: Frame) -> Delivery {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Serialize and send a single message to this display.
    pub fn send_message(&self, message: &BroadcastMessage) -> Delivery {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                Delivery::Dropped
            }
        }
    }

    /// Stop accepting frames. Already queued frames are still delivered.
    pub fn close(&self) {
        let _ = self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> DisplaySummary {
        DisplaySummary {
            info: self.info.clone(),
            tags: self.tags.clone(),
            connection_id: self.connection_id.clone(),
            connected_at: self.connected_at,
            dropped_messages: self.drop_count(),
        }
    }
}

/// In-memory map of connected displays, keyed by display id.
pub struct DisplayRegistry {
    displays: RwLock<HashMap<DisplayId, Arc<DisplayConnection>>>,
    queue_capacity: usize,
}

impl DisplayRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            displays: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a connection. An existing connection for the same display id is
    /// replaced and closed.
    pub fn register(
        &self,
        info: DisplayInfo,
        tags: TagSet,
    ) -> (Arc<DisplayConnection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let conn = Arc::new(DisplayConnection::new(info, tags, tx));
        let previous = self
            .displays
            .write()
            .insert(conn.display_id().clone(), Arc::clone(&conn));
        if let Some(previous) = previous {
            info!(
                display_id = %conn.display_id(),
                old_connection = %previous.connection_id,
                "display reconnected, replacing previous connection"
            );
            previous.close();
        }
        (conn, rx)
    }

    /// Remove the entry for `display_id` only if it is still `connection_id`.
    pub fn remove(&self, display_id: &DisplayId, connection_id: &ConnectionId) -> bool {
        let mut displays = self.displays.write();
        match displays.get(display_id) {
            Some(conn) if &conn.connection_id == connection_id => {
                if let Some(conn) = displays.remove(display_id) {
                    conn.close();
                }
                true
            }
            _ => false,
        }
    }

    /// Force-close whatever connection `display_id` currently has.
    pub fn disconnect(&self, display_id: &DisplayId) -> bool {
        let removed = self.displays.write().remove(display_id);
        match removed {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, display_id: &DisplayId) -> Option<Arc<DisplayConnection>> {
        self.displays.read().get(display_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.displays.read().len()
    }

    /// Registry listing, ordered by display id.
    pub fn list(&self) -> Vec<DisplaySummary> {
        let mut out: Vec<DisplaySummary> =
            self.displays.read().values().map(|c| c.summary()).collect();
        out.sort_by(|a, b| a.info.display_id.cmp(&b.info.display_id));
        out
    }

    /// Send `message` to every display. Returns how many queues accepted it.
    ///
    /// The message is serialized once. Recipients are snapshotted under the
    /// read lock and sent to after it is released; closed channels are pruned.
    pub fn broadcast(&self, message: &BroadcastMessage) -> usize {
        let frame: Frame = match serde_json::to_string(message) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        let recipients: Vec<Arc<DisplayConnection>> =
            self.displays.read().values().cloned().collect();

        let mut delivered = 0;
        for conn in &recipients {
            match conn.send(Arc::clone(&frame)) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {
                    warn!(
                        display_id = %conn.display_id(),
                        dropped = conn.drop_count(),
                        "display queue full, message dropped"
                    );
                }
                Delivery::Closed => {
                    let _ = self.remove(conn.display_id(), &conn.connection_id);
                }
            }
        }
        debug!(
            kind = message.kind(),
            recipients = recipients.len(),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Close and forget every connection.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<DisplayConnection>> =
            self.displays.write().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }
}

/// Removes its registry entry when the owning push stream is dropped.
pub struct ConnectionGuard {
    registry: Arc<DisplayRegistry>,
    display_id: DisplayId,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(registry: Arc<DisplayRegistry>, conn: &DisplayConnection) -> Self {
        Self {
            registry,
            display_id: conn.display_id().clone(),
            connection_id: conn.connection_id.clone(),
        }
    }

    pub fn display_id(&self) -> &DisplayId {
        &self.display_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.display_id, &self.connection_id) {
            info!(
                display_id = %self.display_id,
                connection_id = %self.connection_id,
                remaining = self.registry.count(),
                "display disconnected"
            );
        }
    }
}
