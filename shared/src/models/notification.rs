//! Notification model
//!
//! Read state is cross-session: a `NotificationRead` event from another
//! device updates the shared flag. Once read, a replayed created-class
//! event with lower-or-equal sequence must not resurrect unread state,
//! so the read sequence is kept alongside the flag.

use crate::channel::ChannelScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// System-level notices
    System,
    /// Order lifecycle
    Order,
    /// Stock and supply
    Supply,
    /// Cooperative announcements
    Cooperative,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Order => write!(f, "order"),
            Self::Supply => write!(f, "supply"),
            Self::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// Notification entity (client-side reconciled state)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Notification ID (assigned by server)
    pub id: String,
    /// Tenant scope this notification belongs to
    pub scope: ChannelScope,
    pub kind: NotificationKind,
    /// Title
    pub title: String,
    /// Message body
    pub body: String,
    /// Shared read flag (propagates across sessions)
    #[serde(default)]
    pub read: bool,
    /// Server sequence at creation
    pub created_sequence: u64,
    /// Server sequence of the read event, when read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_sequence: Option<u64>,
    /// Server wall-clock creation time, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Mark read at the given sequence; keeps the highest read sequence
    pub fn mark_read(&mut self, sequence: u64) {
        self.read = true;
        self.read_sequence = Some(self.read_sequence.map_or(sequence, |s| s.max(sequence)));
    }
}
