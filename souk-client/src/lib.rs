//! Souk Client - realtime synchronization core for the Souk marketplace
//!
//! Keeps client-visible order and notification state consistent with a
//! live server event stream across tenant roles (merchant, supplier,
//! cooperative, admin), through unreliable network conditions.
//!
//! # Pipeline
//!
//! ```text
//! ChannelRegistry ─▶ StreamConnection ─▶ Normalizer ─▶ ReconcileEngine
//!                                                          │
//!                                  NotificationDispatcher ◀┤
//!                                       ProjectionStore  ◀─┘
//! ```
//!
//! Consumers subscribe through [`SyncClient`]; everything else is
//! internal. During disconnects consumers keep their last-known-good
//! state and can watch the per-channel [`shared::ChannelState`].

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod normalizer;
pub mod projection;
pub mod reconcile;
pub mod session;
pub mod transport;

mod connection;
mod registry;

pub use client::{OrderCallback, Subscription, SyncClient};
pub use config::SyncConfig;
pub use dispatcher::NotificationCallback;
pub use projection::SupplierCartView;
pub use session::{AllowAll, ScopeAuthorizer, StaticAuthorizer};
pub use transport::{MemoryHub, MemoryTransport, Transport, TransportConn};

// Re-export shared types for convenience
pub use shared::channel::{ChannelScope, ChannelState, TenantRole};
pub use shared::error::{SyncError, SyncResult};
pub use shared::models::{LineItem, Notification, NotificationKind, Order, OrderStatus};
