//! Transport layer abstraction
//!
//! The sync core never speaks a concrete protocol; it consumes this
//! pluggable seam:
//!
//! ```text
//!         ┌────────────────────┐
//!         │   Transport Trait  │  ◄── pluggable seam
//!         └────────┬───────────┘
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!   (network impls)   MemoryTransport
//!                     (in-process / tests)
//! ```
//!
//! Raw transport errors never reach consumers; the stream connection
//! absorbs them into its backoff state machine.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use shared::error::SyncError;
use shared::event::RawEvent;
use shared::sync::{SnapshotEntity, SnapshotRequest, SnapshotResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};

/// Transport trait
///
/// Produces one live connection per channel subscription.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open a connection carrying the given logical channels
    async fn connect(&self, channels: &[String]) -> Result<Box<dyn TransportConn>, SyncError>;
}

/// A live transport connection
#[async_trait]
pub trait TransportConn: Send + Sync + std::fmt::Debug {
    /// Read the next raw event from the stream
    async fn next_event(&self) -> Result<RawEvent, SyncError>;

    /// Request a full or targeted snapshot of current entities
    async fn request_snapshot(&self, request: SnapshotRequest)
    -> Result<SnapshotResponse, SyncError>;

    /// Fire-and-forget read receipt for a notification
    async fn send_read_receipt(&self, notification_id: &str) -> Result<(), SyncError>;

    /// Close the transport connection
    async fn close(&self);
}

// ==================== In-memory implementation ====================

/// Frames carried on the in-memory wire
#[derive(Debug, Clone)]
enum HubFrame {
    Event(RawEvent),
    /// Server-initiated connection drop (simulated failure)
    Drop,
}

/// In-memory server stand-in for tests and same-process embedding
///
/// Tests publish raw events, stage snapshot responses per channel, and
/// observe read receipts. Mirrors the broadcast-pair wiring the real
/// server uses.
#[derive(Debug, Clone)]
pub struct MemoryHub {
    frames_tx: broadcast::Sender<HubFrame>,
    snapshots: Arc<SyncMutex<HashMap<String, SnapshotResponse>>>,
    receipts: Arc<SyncMutex<Vec<String>>>,
    /// When false, connect attempts fail (simulated outage)
    accepting: Arc<AtomicBool>,
    epoch: Arc<SyncMutex<String>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        let (frames_tx, _) = broadcast::channel(1024);
        Self {
            frames_tx,
            snapshots: Arc::new(SyncMutex::new(HashMap::new())),
            receipts: Arc::new(SyncMutex::new(Vec::new())),
            accepting: Arc::new(AtomicBool::new(true)),
            epoch: Arc::new(SyncMutex::new("epoch-1".to_string())),
        }
    }

    /// Transport handle for clients of this hub
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Publish a raw event to all connected clients
    pub fn publish(&self, event: RawEvent) {
        // no subscribers is fine - nobody is connected yet
        let _ = self.frames_tx.send(HubFrame::Event(event));
    }

    /// Stage the snapshot returned for a channel
    pub fn set_snapshot(&self, channel: impl Into<String>, entities: Vec<SnapshotEntity>, server_sequence: u64) {
        let epoch = self.epoch.lock().clone();
        self.snapshots.lock().insert(
            channel.into(),
            SnapshotResponse {
                entities,
                server_sequence,
                server_epoch: epoch,
            },
        );
    }

    /// Drop all live connections (clients will enter backoff)
    pub fn drop_connections(&self) {
        let _ = self.frames_tx.send(HubFrame::Drop);
    }

    /// Refuse/accept new connections (simulated outage window)
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Simulate a server restart: new epoch, connections dropped
    pub fn restart_with_epoch(&self, epoch: impl Into<String>) {
        let epoch = epoch.into();
        *self.epoch.lock() = epoch.clone();
        let mut snapshots = self.snapshots.lock();
        for snapshot in snapshots.values_mut() {
            snapshot.server_epoch = epoch.clone();
        }
        drop(snapshots);
        self.drop_connections();
    }

    /// Read receipts observed so far
    pub fn receipts(&self) -> Vec<String> {
        self.receipts.lock().clone()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory Transport Implementation (for In-Process communication)
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, channels: &[String]) -> Result<Box<dyn TransportConn>, SyncError> {
        if !self.hub.accepting.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection refused".to_string()));
        }
        Ok(Box::new(MemoryConn {
            channels: channels.to_vec(),
            rx: Mutex::new(self.hub.frames_tx.subscribe()),
            hub: self.hub.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One live in-memory connection
pub struct MemoryConn {
    channels: Vec<String>,
    rx: Mutex<broadcast::Receiver<HubFrame>>,
    hub: MemoryHub,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConn")
            .field("channels", &self.channels)
            .finish()
    }
}

#[async_trait]
impl TransportConn for MemoryConn {
    async fn next_event(&self) -> Result<RawEvent, SyncError> {
        let mut rx = self.rx.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SyncError::Transport("connection closed".to_string()));
            }
            match rx.recv().await {
                Ok(HubFrame::Event(event)) => {
                    // only events for our subscribed channels
                    if self.channels.iter().any(|c| c == &event.channel) {
                        return Ok(event);
                    }
                }
                Ok(HubFrame::Drop) => {
                    return Err(SyncError::Transport("connection dropped".to_string()));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // missed frames - indistinguishable from packet loss
                    return Err(SyncError::Transport(format!("stream lagged by {}", n)));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SyncError::Transport("hub closed".to_string()));
                }
            }
        }
    }

    async fn request_snapshot(
        &self,
        request: SnapshotRequest,
    ) -> Result<SnapshotResponse, SyncError> {
        let snapshots = self.hub.snapshots.lock();
        let mut response = snapshots.get(&request.channel).cloned().unwrap_or_else(|| {
            SnapshotResponse {
                entities: Vec::new(),
                server_sequence: 0,
                server_epoch: self.hub.epoch.lock().clone(),
            }
        });
        if !request.entity_ids.is_empty() {
            response
                .entities
                .retain(|e| request.entity_ids.iter().any(|id| id == e.entity_id()));
        }
        Ok(response)
    }

    async fn send_read_receipt(&self, notification_id: &str) -> Result<(), SyncError> {
        self.hub.receipts.lock().push(notification_id.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(channel: &str, sequence: u64) -> RawEvent {
        RawEvent {
            channel: channel.to_string(),
            kind: "ORDER_CREATED".to_string(),
            entity: serde_json::json!({ "id": "o-1", "status": "PLACED", "items": [] }),
            version: 1,
            sequence,
        }
    }

    #[tokio::test]
    async fn test_memory_conn_filters_channels() {
        let hub = MemoryHub::new();
        let transport = hub.transport();
        let conn = transport
            .connect(&["merchant:m-1".to_string()])
            .await
            .unwrap();

        hub.publish(raw("supplier:s-1", 1));
        hub.publish(raw("merchant:m-1", 2));

        let event = conn.next_event().await.unwrap();
        assert_eq!(event.channel, "merchant:m-1");
        assert_eq!(event.sequence, 2);
    }

    #[tokio::test]
    async fn test_drop_surfaces_as_transport_error() {
        let hub = MemoryHub::new();
        let conn = hub
            .transport()
            .connect(&["merchant:m-1".to_string()])
            .await
            .unwrap();

        hub.drop_connections();
        assert!(matches!(
            conn.next_event().await,
            Err(SyncError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let hub = MemoryHub::new();
        hub.set_accepting(false);
        assert!(
            hub.transport()
                .connect(&["merchant:m-1".to_string()])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_targeted_snapshot_filters_entities() {
        use shared::channel::ChannelScope;
        use shared::models::{Order, OrderStatus};

        let hub = MemoryHub::new();
        let order = |id: &str| {
            SnapshotEntity::Order(Order {
                id: id.to_string(),
                scope: ChannelScope::merchant("m-1"),
                supplier_id: None,
                status: OrderStatus::Placed,
                version: 1,
                items: vec![],
                last_sequence: 1,
            })
        };
        hub.set_snapshot("merchant:m-1", vec![order("o-1"), order("o-2")], 5);

        let conn = hub
            .transport()
            .connect(&["merchant:m-1".to_string()])
            .await
            .unwrap();
        let response = conn
            .request_snapshot(SnapshotRequest::targeted(
                "merchant:m-1",
                vec!["o-2".to_string()],
            ))
            .await
            .unwrap();

        assert_eq!(response.entities.len(), 1);
        assert_eq!(response.entities[0].entity_id(), "o-2");
        assert_eq!(response.server_sequence, 5);
    }
}
