//! Shared types for the Souk marketplace sync framework
//!
//! Common types used across multiple crates including channel scopes,
//! wire events, order/notification models, the snapshot protocol, and
//! error types.

pub mod channel;
pub mod error;
pub mod event;
pub mod models;
pub mod sync;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Channel re-exports (for convenient access)
pub use channel::{ChannelScope, ChannelState, TenantRole};

// Event re-exports
pub use event::{NormalizedEvent, RawEvent};

// Error re-exports
pub use error::{SyncError, SyncResult};
