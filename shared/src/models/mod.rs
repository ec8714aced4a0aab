//! Domain models owned by the reconciliation engine

pub mod notification;
pub mod order;

pub use notification::{Notification, NotificationKind};
pub use order::{LineItem, Order, OrderStatus};
