//! Order model - computed state from the event stream
//!
//! An order's `version` is the AUTHORITATIVE merge key: events carrying a
//! version lower or equal to the entity's current version are replays and
//! must be no-ops. `last_sequence` records the server sequence of the last
//! applied event, for diagnostics and resync bookkeeping.

use crate::channel::ChannelScope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status
///
/// Transitions are restricted to a directed graph:
///
/// ```text
/// placed → confirmed → preparing → ready → completed
///    └────────┴───────────┴─────────┴──▶ cancelled
/// ```
///
/// `cancelled` is reachable from any non-terminal state. Reordered or
/// corrupted events attempting any other edge are rejected by the merge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Placed,
    Confirmed,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Whether this status admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Position on the forward path, for reachability checks
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Placed => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Preparing => 2,
            OrderStatus::Ready => 3,
            OrderStatus::Completed => 4,
            OrderStatus::Cancelled => 5,
        }
    }

    /// Whether `next` is reachable from `self` on the allowed graph
    ///
    /// Forward jumps (e.g. placed → ready) are reachable: intermediate
    /// events may simply not have been delivered. Backward moves and
    /// moves out of a terminal state are not. Staying in place is allowed
    /// (non-status fields may still change).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            OrderStatus::Cancelled => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Placed => write!(f, "PLACED"),
            OrderStatus::Confirmed => write!(f, "CONFIRMED"),
            OrderStatus::Preparing => write!(f, "PREPARING"),
            OrderStatus::Ready => write!(f, "READY"),
            OrderStatus::Completed => write!(f, "COMPLETED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Order line item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Catalog item ID
    pub item_id: String,
    /// Item name (snapshot at order time)
    pub name: String,
    pub quantity: i32,
    /// Unit price in currency unit
    pub unit_price: f64,
}

/// Order entity (client-side reconciled state)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Order ID (assigned by server)
    pub id: String,
    /// Tenant scope this order belongs to
    pub scope: ChannelScope,
    /// Supplier fulfilling the order, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    pub status: OrderStatus,
    /// Entity version - monotonically non-decreasing under merge
    pub version: u64,
    pub items: Vec<LineItem>,
    /// Server sequence of the last applied event
    #[serde(default)]
    pub last_sequence: u64,
}

impl Order {
    /// Line total across all items
    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|i| i.unit_price * i.quantity as f64)
            .sum()
    }
}
