//! Snapshot protocol for resynchronization
//!
//! On reconnect (and on targeted resync after buffer eviction) the client
//! requests a full snapshot of current entities for a channel. Each
//! snapshot entity carries its reported version, so the reconciliation
//! engine's idempotent merge rule closes any gap transparently.
//!
//! The response carries `server_epoch` - a unique ID the server generates
//! on startup. An epoch change means the server restarted and its sequence
//! space reset; clients must discard buffered events from the old epoch.

use crate::models::{Notification, Order};
use serde::{Deserialize, Serialize};

/// Snapshot request for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Logical channel identifier
    pub channel: String,
    /// Entity ids to limit the snapshot to (empty = all current entities)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_ids: Vec<String>,
}

impl SnapshotRequest {
    pub fn full(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            entity_ids: Vec::new(),
        }
    }

    pub fn targeted(channel: impl Into<String>, entity_ids: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            entity_ids,
        }
    }
}

/// One entity in a snapshot, at its reported version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotEntity {
    Order(Order),
    Notification(Notification),
}

impl SnapshotEntity {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Order(o) => &o.id,
            Self::Notification(n) => &n.id,
        }
    }
}

/// Snapshot response for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// Current entities with their versions
    pub entities: Vec<SnapshotEntity>,
    /// Server's current sequence number
    pub server_sequence: u64,
    /// Server instance epoch (UUID generated on startup)
    /// Used to detect server restarts
    pub server_epoch: String,
}
