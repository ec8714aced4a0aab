//! Event normalization - raw wire events to canonical internal form
//!
//! Pure transformation. Malformed payloads produce an error the caller
//! logs and drops; nothing here panics or aborts the pipeline. The
//! snapshot half of the resynchronization protocol also lives here:
//! snapshot entities become synthetic created-class events at their
//! reported versions, so the engine's idempotent merge rule reconciles
//! any gap without special cases.

use shared::channel::ChannelScope;
use shared::error::SyncError;
use shared::event::{EntityRef, EventKind, NormalizedEvent, NotificationBody, OrderBody, RawEvent};
use shared::models::{Notification, Order};
use shared::sync::{SnapshotEntity, SnapshotResponse};

/// Normalize one raw event
pub fn normalize(raw: &RawEvent) -> Result<NormalizedEvent, SyncError> {
    let scope = ChannelScope::parse(&raw.channel).ok_or_else(|| SyncError::MalformedEvent {
        channel: raw.channel.clone(),
        detail: "unparseable channel id".to_string(),
    })?;

    let kind = EventKind::parse(&raw.kind).ok_or_else(|| SyncError::MalformedEvent {
        channel: raw.channel.clone(),
        detail: format!("unknown event type {:?}", raw.kind),
    })?;

    let malformed = |detail: String| SyncError::MalformedEvent {
        channel: raw.channel.clone(),
        detail,
    };

    match kind {
        EventKind::OrderCreated | EventKind::OrderUpdated => {
            let body: OrderBody = serde_json::from_value(raw.entity.clone())
                .map_err(|e| malformed(format!("bad order body: {}", e)))?;
            let order = Order {
                id: body.id,
                scope,
                supplier_id: body.supplier_id,
                status: body.status,
                version: raw.version,
                items: body.items,
                last_sequence: raw.sequence,
            };
            Ok(match kind {
                EventKind::OrderCreated => NormalizedEvent::OrderCreated {
                    order,
                    sequence: raw.sequence,
                },
                _ => NormalizedEvent::OrderUpdated {
                    order,
                    sequence: raw.sequence,
                },
            })
        }
        EventKind::OrderCancelled => {
            let body: EntityRef = serde_json::from_value(raw.entity.clone())
                .map_err(|e| malformed(format!("bad cancel body: {}", e)))?;
            Ok(NormalizedEvent::OrderCancelled {
                order_id: body.id,
                scope,
                version: raw.version,
                sequence: raw.sequence,
            })
        }
        EventKind::NotificationCreated => {
            let body: NotificationBody = serde_json::from_value(raw.entity.clone())
                .map_err(|e| malformed(format!("bad notification body: {}", e)))?;
            let read_sequence = body.read.then_some(raw.sequence);
            Ok(NormalizedEvent::NotificationCreated {
                notification: Notification {
                    id: body.id,
                    scope,
                    kind: body.kind,
                    title: body.title,
                    body: body.body,
                    read: body.read,
                    created_sequence: raw.version,
                    read_sequence,
                    created_at: body.created_at,
                },
                sequence: raw.sequence,
            })
        }
        EventKind::NotificationRead => {
            let body: EntityRef = serde_json::from_value(raw.entity.clone())
                .map_err(|e| malformed(format!("bad read body: {}", e)))?;
            Ok(NormalizedEvent::NotificationRead {
                notification_id: body.id,
                scope,
                sequence: raw.sequence,
            })
        }
    }
}

/// Convert a snapshot into synthetic created-class events
///
/// Created-class on purpose: absent entities insert, present entities go
/// through the ordinary version rule, which is exactly upsert.
pub fn snapshot_events(response: &SnapshotResponse) -> Vec<NormalizedEvent> {
    let sequence = response.server_sequence;
    response
        .entities
        .iter()
        .map(|entity| match entity {
            SnapshotEntity::Order(order) => NormalizedEvent::OrderCreated {
                order: order.clone(),
                sequence,
            },
            SnapshotEntity::Notification(notification) => NormalizedEvent::NotificationCreated {
                notification: notification.clone(),
                sequence,
            },
        })
        .collect()
}
