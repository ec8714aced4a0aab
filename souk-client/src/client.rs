//! SyncClient - consumer-facing facade over the sync pipeline
//!
//! Wires the pipeline together: registry → stream connection →
//! normalizer → reconciliation engine → dispatcher/projections. One
//! reconcile task per channel consumes that channel's ordered queue, so
//! merges for a channel are never concurrent; all consumer callbacks are
//! invoked from that task with no engine lock held, which makes nested
//! calls back into the client (subscribe, unsubscribe, mark-read) safe.
//!
//! Exposed reads are synchronous views of current reconciled state;
//! writes are fire-and-forget with effects observed through callbacks.

use crate::config::SyncConfig;
use crate::connection::ChannelMessage;
use crate::dispatcher::{NotificationCallback, NotificationDispatcher};
use crate::projection::{ProjectionStore, SupplierCartView};
use crate::reconcile::{AppliedChange, ReconcileEngine};
use crate::registry::{Acquired, ChannelRegistry};
use crate::session::ScopeAuthorizer;
use crate::transport::Transport;
use dashmap::DashMap;
use shared::channel::{ChannelScope, ChannelState};
use shared::error::SyncError;
use shared::models::{Notification, Order, OrderStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Order callback type
pub type OrderCallback = Arc<dyn Fn(&Order) + Send + Sync>;

struct OrderSubscriber {
    scope: ChannelScope,
    alive: Arc<AtomicBool>,
    callback: OrderCallback,
}

/// Scope-filtered fan-out of reconciled order changes
#[derive(Default)]
struct OrderSubscribers {
    subscribers: DashMap<Uuid, OrderSubscriber>,
}

impl OrderSubscribers {
    fn subscribe(&self, scope: ChannelScope, callback: OrderCallback) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            OrderSubscriber {
                scope,
                alive: Arc::new(AtomicBool::new(true)),
                callback,
            },
        );
        id
    }

    fn unsubscribe(&self, id: &Uuid) {
        if let Some(subscriber) = self.subscribers.get(id) {
            subscriber.alive.store(false, Ordering::SeqCst);
        }
        self.subscribers.remove(id);
    }

    fn dispatch(&self, order: &Order) {
        let targets: Vec<(Arc<AtomicBool>, OrderCallback)> = self
            .subscribers
            .iter()
            .filter(|entry| entry.scope == order.scope)
            .map(|entry| (entry.alive.clone(), entry.callback.clone()))
            .collect();
        for (alive, callback) in targets {
            if alive.load(Ordering::SeqCst) {
                callback(order);
            }
        }
    }
}

struct ClientInner {
    registry: ChannelRegistry,
    engine: Arc<ReconcileEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    order_subs: Arc<OrderSubscribers>,
    projections: Arc<ProjectionStore>,
}

/// The synchronization client
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl SyncClient {
    /// Create a client with the default (LAN) configuration
    pub fn new(transport: Arc<dyn Transport>, authorizer: Arc<dyn ScopeAuthorizer>) -> Self {
        Self::with_config(SyncConfig::default(), transport, authorizer)
    }

    pub fn with_config(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn ScopeAuthorizer>,
    ) -> Self {
        let engine = Arc::new(ReconcileEngine::new(crate::reconcile::BufferLimits {
            max_entries: config.pending_buffer_limit,
            max_age: config.pending_buffer_ttl,
        }));
        Self {
            inner: Arc::new(ClientInner {
                registry: ChannelRegistry::new(config, transport, authorizer),
                engine,
                dispatcher: Arc::new(NotificationDispatcher::new()),
                order_subs: Arc::new(OrderSubscribers::default()),
                projections: Arc::new(ProjectionStore::new()),
            }),
        }
    }

    // ==================== Subscriptions ====================

    /// Subscribe to reconciled order changes for a scope
    ///
    /// Fails synchronously with [`SyncError::UnauthorizedScope`] if the
    /// session may not subscribe to the scope.
    pub fn subscribe_orders(
        &self,
        scope: ChannelScope,
        callback: OrderCallback,
    ) -> Result<Subscription, SyncError> {
        self.open_channel(&scope)?;
        let id = self.inner.order_subs.subscribe(scope.clone(), callback);
        Ok(Subscription {
            id,
            kind: SubscriptionKind::Orders,
            channel_id: scope.channel_id(),
            inner: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        })
    }

    /// Subscribe to notification state transitions for a scope
    pub fn subscribe_notifications(
        &self,
        scope: ChannelScope,
        callback: NotificationCallback,
    ) -> Result<Subscription, SyncError> {
        self.open_channel(&scope)?;
        let (id, _alive) = self.inner.dispatcher.subscribe(scope.clone(), callback);
        Ok(Subscription {
            id,
            kind: SubscriptionKind::Notifications,
            channel_id: scope.channel_id(),
            inner: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        })
    }

    /// Acquire the channel slot; on first subscriber, start its
    /// reconcile task
    fn open_channel(&self, scope: &ChannelScope) -> Result<(), SyncError> {
        match self.inner.registry.acquire(scope)? {
            Acquired::Opened {
                queue_rx,
                resync_tx,
            } => {
                tokio::spawn(run_reconciler(
                    self.inner.engine.clone(),
                    self.inner.dispatcher.clone(),
                    self.inner.order_subs.clone(),
                    self.inner.projections.clone(),
                    queue_rx,
                    resync_tx,
                ));
                Ok(())
            }
            Acquired::Joined => Ok(()),
        }
    }

    // ==================== Reads ====================

    /// Current reconciled orders for a scope
    pub fn orders(&self, scope: &ChannelScope) -> Vec<Order> {
        self.inner.engine.orders(scope)
    }

    /// One order by id
    pub fn order(&self, scope: &ChannelScope, order_id: &str) -> Option<Order> {
        self.inner.engine.order(scope, order_id)
    }

    /// Orders grouped by status
    pub fn orders_by_status(&self, scope: &ChannelScope) -> HashMap<OrderStatus, Vec<Order>> {
        self.inner.projections.orders_by_status(scope)
    }

    /// Orders for one supplier grouped by status
    pub fn orders_for_supplier(
        &self,
        scope: &ChannelScope,
        supplier_id: &str,
    ) -> HashMap<OrderStatus, Vec<Order>> {
        self.inner.projections.orders_for_supplier(scope, supplier_id)
    }

    /// Current reconciled notifications for a scope
    pub fn notifications(&self, scope: &ChannelScope) -> Vec<Notification> {
        self.inner.engine.notifications(scope)
    }

    pub fn unread_count(&self, scope: &ChannelScope) -> usize {
        self.inner.engine.unread_count(scope)
    }

    /// Observe a channel's connection state - the only user-visible
    /// signal during backoff
    pub fn connection_state(&self, scope: &ChannelScope) -> watch::Receiver<ChannelState> {
        self.inner.registry.connection_state(&scope.channel_id())
    }

    // ==================== Supplier cart ====================

    /// Merchant-local supplier cart view
    pub fn cart_projection(&self, merchant_id: &str) -> SupplierCartView {
        self.inner.projections.cart_projection(merchant_id)
    }

    pub fn set_cart_quantity(
        &self,
        merchant_id: &str,
        supplier_id: &str,
        item_id: &str,
        quantity: u32,
    ) {
        self.inner
            .projections
            .set_cart_quantity(merchant_id, supplier_id, item_id, quantity);
    }

    pub fn submission_lines(&self, merchant_id: &str, supplier_id: &str) -> Vec<(String, u32)> {
        self.inner.projections.submission_lines(merchant_id, supplier_id)
    }

    pub fn clear_cart(&self, merchant_id: &str, supplier_id: &str) {
        self.inner.projections.clear_cart(merchant_id, supplier_id);
    }

    // ==================== Writes ====================

    /// Mark a notification read (fire-and-forget)
    ///
    /// The local effect lands through the channel queue, in reconciled
    /// order; a read receipt goes to the server so other sessions
    /// converge.
    pub fn mark_notification_read(&self, notification_id: &str) {
        let Some(scope) = self.inner.engine.find_notification_scope(notification_id) else {
            tracing::debug!(notification_id, "mark-read for unknown notification ignored");
            return;
        };

        let channel_id = scope.channel_id();
        if let Some((queue_tx, receipt_tx)) = self.inner.registry.senders(&channel_id) {
            let _ = queue_tx.send(ChannelMessage::LocalRead {
                notification_id: notification_id.to_string(),
            });
            let _ = receipt_tx.send(notification_id.to_string());
        } else if let Some((_, change)) = self.inner.engine.mark_read_local(notification_id) {
            // channel already closed: apply locally all the same
            fan_out(
                std::slice::from_ref(&change),
                &self.inner.dispatcher,
                &self.inner.order_subs,
                &self.inner.projections,
            );
        }
    }
}

// ==================== Subscription handle ====================

#[derive(Debug, Clone, Copy)]
enum SubscriptionKind {
    Orders,
    Notifications,
}

/// A live consumer subscription
///
/// Dropping the handle unsubscribes. Unsubscribe is synchronous: after
/// it returns (or after drop), the callback is never invoked again, and
/// the last handle on a channel tears the channel down.
pub struct Subscription {
    id: Uuid,
    kind: SubscriptionKind,
    channel_id: String,
    inner: Weak<ClientInner>,
    released: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl Subscription {
    /// Stop deliveries to this handle and release its channel slot
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match self.kind {
            SubscriptionKind::Orders => inner.order_subs.unsubscribe(&self.id),
            SubscriptionKind::Notifications => inner.dispatcher.unsubscribe(&self.id),
        }
        inner.registry.release(&self.channel_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ==================== Per-channel reconcile task ====================

/// Consume one channel's ordered queue and fan out applied changes
///
/// Runs until every sender on the queue is gone (connection task exited
/// and the registry entry was removed).
async fn run_reconciler(
    engine: Arc<ReconcileEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    order_subs: Arc<OrderSubscribers>,
    projections: Arc<ProjectionStore>,
    mut queue_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    resync_tx: mpsc::UnboundedSender<Vec<String>>,
) {
    while let Some(message) = queue_rx.recv().await {
        let report = match message {
            ChannelMessage::Event(event) => engine.merge(event),
            ChannelMessage::Snapshot {
                channel,
                epoch,
                events,
                server_sequence,
            } => engine.apply_snapshot(&channel, &epoch, events, server_sequence),
            ChannelMessage::LocalRead { notification_id } => {
                if let Some((_, change)) = engine.mark_read_local(&notification_id) {
                    fan_out(
                        std::slice::from_ref(&change),
                        &dispatcher,
                        &order_subs,
                        &projections,
                    );
                }
                continue;
            }
        };

        if !report.resync.is_empty() {
            let _ = resync_tx.send(report.resync);
        }
        fan_out(&report.applied, &dispatcher, &order_subs, &projections);
    }
    tracing::debug!("reconcile task stopped");
}

/// Apply reconciled changes to projections, then invoke callbacks
///
/// Called with no engine lock held.
fn fan_out(
    changes: &[AppliedChange],
    dispatcher: &NotificationDispatcher,
    order_subs: &OrderSubscribers,
    projections: &ProjectionStore,
) {
    for change in changes {
        match change {
            AppliedChange::Order(order) => {
                projections.on_order_changed(order);
                order_subs.dispatch(order);
            }
            AppliedChange::Notification {
                notification,
                created,
                read,
            } => {
                dispatcher.dispatch(notification, *created, *read);
            }
        }
    }
}
