//! Wire events and their canonical internal form
//!
//! Raw events arrive from the transport as tagged payloads
//! `{channel, type, entity, version, sequence}`. The server-assigned
//! `sequence` is the AUTHORITATIVE ordering key, but it is not guaranteed
//! contiguous and events may arrive out of order or duplicated - the
//! reconciliation engine resolves that, not the transport.

use crate::channel::ChannelScope;
use crate::models::{LineItem, Notification, NotificationKind, Order, OrderStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Raw wire shape ====================

/// Raw server event, as delivered by the transport
///
/// The `entity` payload is opaque at this layer; the normalizer is the
/// only component that interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Logical channel identifier, e.g. `merchant:m-1`
    pub channel: String,
    /// Event type tag, e.g. `ORDER_UPDATED`
    #[serde(rename = "type")]
    pub kind: String,
    /// Entity payload (opaque JSON)
    pub entity: serde_json::Value,
    /// Entity version carried by this event
    pub version: u64,
    /// Server-assigned global sequence number
    pub sequence: u64,
}

/// Known raw event type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    OrderCreated,
    OrderUpdated,
    OrderCancelled,
    NotificationCreated,
    NotificationRead,
}

impl EventKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "ORDER_CREATED" => Some(Self::OrderCreated),
            "ORDER_UPDATED" => Some(Self::OrderUpdated),
            "ORDER_CANCELLED" => Some(Self::OrderCancelled),
            "NOTIFICATION_CREATED" => Some(Self::NotificationCreated),
            "NOTIFICATION_READ" => Some(Self::NotificationRead),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderCreated => write!(f, "ORDER_CREATED"),
            Self::OrderUpdated => write!(f, "ORDER_UPDATED"),
            Self::OrderCancelled => write!(f, "ORDER_CANCELLED"),
            Self::NotificationCreated => write!(f, "NOTIFICATION_CREATED"),
            Self::NotificationRead => write!(f, "NOTIFICATION_READ"),
        }
    }
}

// ==================== Entity payload bodies ====================

/// Order body carried by `ORDER_CREATED` / `ORDER_UPDATED` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBody {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

/// Notification body carried by `NOTIFICATION_CREATED` events
///
/// Snapshot replays may carry `read = true`; live creations never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBody {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Entity-reference body for `ORDER_CANCELLED` / `NOTIFICATION_READ`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

// ==================== Canonical internal form ====================

/// Canonical event shape produced by the normalizer
///
/// Every variant carries the entity id, tenant scope, server sequence
/// (the logical timestamp) and entity version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NormalizedEvent {
    OrderCreated {
        order: Order,
        sequence: u64,
    },
    OrderUpdated {
        order: Order,
        sequence: u64,
    },
    OrderCancelled {
        order_id: String,
        scope: ChannelScope,
        version: u64,
        sequence: u64,
    },
    NotificationCreated {
        notification: Notification,
        sequence: u64,
    },
    NotificationRead {
        notification_id: String,
        scope: ChannelScope,
        sequence: u64,
    },
}

impl NormalizedEvent {
    /// The entity this event targets
    pub fn entity_id(&self) -> &str {
        match self {
            Self::OrderCreated { order, .. } | Self::OrderUpdated { order, .. } => &order.id,
            Self::OrderCancelled { order_id, .. } => order_id,
            Self::NotificationCreated { notification, .. } => &notification.id,
            Self::NotificationRead {
                notification_id, ..
            } => notification_id,
        }
    }

    /// The tenant scope this event is addressed to
    pub fn scope(&self) -> &ChannelScope {
        match self {
            Self::OrderCreated { order, .. } | Self::OrderUpdated { order, .. } => &order.scope,
            Self::OrderCancelled { scope, .. } => scope,
            Self::NotificationCreated { notification, .. } => &notification.scope,
            Self::NotificationRead { scope, .. } => scope,
        }
    }

    /// Server sequence number (logical timestamp)
    pub fn sequence(&self) -> u64 {
        match self {
            Self::OrderCreated { sequence, .. }
            | Self::OrderUpdated { sequence, .. }
            | Self::OrderCancelled { sequence, .. }
            | Self::NotificationCreated { sequence, .. }
            | Self::NotificationRead { sequence, .. } => *sequence,
        }
    }

    /// Entity version this event asserts
    ///
    /// Notifications are versioned by sequence (creation sequence for
    /// created, read sequence for read).
    pub fn version(&self) -> u64 {
        match self {
            Self::OrderCreated { order, .. } | Self::OrderUpdated { order, .. } => order.version,
            Self::OrderCancelled { version, .. } => *version,
            Self::NotificationCreated { notification, .. } => notification.created_sequence,
            Self::NotificationRead { sequence, .. } => *sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_wire_shape() {
        let json = serde_json::json!({
            "channel": "merchant:m-1",
            "type": "ORDER_CREATED",
            "entity": { "id": "o-1", "status": "PLACED", "items": [] },
            "version": 1,
            "sequence": 7,
        });

        let raw: RawEvent = serde_json::from_value(json).unwrap();
        assert_eq!(raw.kind, "ORDER_CREATED");
        assert_eq!(EventKind::parse(&raw.kind), Some(EventKind::OrderCreated));
        assert_eq!(raw.sequence, 7);

        let body: OrderBody = serde_json::from_value(raw.entity).unwrap();
        assert_eq!(body.id, "o-1");
        assert_eq!(body.status, OrderStatus::Placed);
    }

    #[test]
    fn test_unknown_kind_is_not_an_error_here() {
        // the normalizer decides what to do with unknown tags
        assert_eq!(EventKind::parse("ORDER_EXPLODED"), None);
    }
}
