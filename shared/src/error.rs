//! Sync pipeline error types
//!
//! Propagation policy: pipeline-internal errors (transport failures,
//! malformed events, rejected transitions, buffer evictions) are absorbed
//! and logged where they occur - they never cross a channel boundary or
//! reach a consumer callback. Only subscription-setup errors are surfaced
//! synchronously to the caller.

use crate::channel::ChannelScope;
use crate::models::OrderStatus;
use thiserror::Error;

/// Sync core error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure - recoverable, drives the backoff state machine
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed event payload - recoverable, dropped with a diagnostic
    #[error("malformed event on {channel}: {detail}")]
    MalformedEvent { channel: String, detail: String },

    /// Rejected order status transition - recoverable, entity unchanged
    #[error("invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Subscription scope not authorized for the current session
    /// Fatal to the subscribe call only
    #[error("scope not authorized: {0}")]
    UnauthorizedScope(ChannelScope),

    /// Pending buffer eviction (count or age bound) - recoverable,
    /// triggers a targeted resync
    #[error("buffered events for entity {entity_id} evicted, resync required")]
    BufferOverflowResync { entity_id: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
