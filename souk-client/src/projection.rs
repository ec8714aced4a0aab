//! Derived views - never authoritative
//!
//! The projection store mirrors reconciled orders into read-optimized
//! shapes on every applied change, and keeps merchant-local supplier
//! carts. Cart edits are merged into an order only at submission time,
//! by the caller, after the server acknowledges - nothing here writes
//! back into the synchronized collections.

use parking_lot::RwLock;
use shared::channel::ChannelScope;
use shared::models::{Order, OrderStatus};
use std::collections::{BTreeMap, HashMap};

/// Supplier cart view: supplier id -> item id -> requested quantity
pub type SupplierCartView = BTreeMap<String, BTreeMap<String, u32>>;

/// Read-optimized projections over the reconciled order collection
#[derive(Default)]
pub struct ProjectionStore {
    /// Mirror of reconciled orders, updated on every applied change
    orders: RwLock<HashMap<ChannelScope, HashMap<String, Order>>>,
    /// Merchant-session-local cart edits (non-authoritative)
    carts: RwLock<HashMap<String, SupplierCartView>>,
}

impl std::fmt::Debug for ProjectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionStore").finish()
    }
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reconciled order change into the mirror
    pub fn on_order_changed(&self, order: &Order) {
        self.orders
            .write()
            .entry(order.scope.clone())
            .or_default()
            .insert(order.id.clone(), order.clone());
    }

    /// Orders for one scope grouped by status
    pub fn orders_by_status(&self, scope: &ChannelScope) -> HashMap<OrderStatus, Vec<Order>> {
        let orders = self.orders.read();
        let mut grouped: HashMap<OrderStatus, Vec<Order>> = HashMap::new();
        if let Some(scoped) = orders.get(scope) {
            for order in scoped.values() {
                grouped.entry(order.status).or_default().push(order.clone());
            }
        }
        for bucket in grouped.values_mut() {
            bucket.sort_by(|a, b| a.id.cmp(&b.id));
        }
        grouped
    }

    /// Orders for one supplier within a scope, grouped by status
    pub fn orders_for_supplier(
        &self,
        scope: &ChannelScope,
        supplier_id: &str,
    ) -> HashMap<OrderStatus, Vec<Order>> {
        let orders = self.orders.read();
        let mut grouped: HashMap<OrderStatus, Vec<Order>> = HashMap::new();
        if let Some(scoped) = orders.get(scope) {
            for order in scoped.values() {
                if order.supplier_id.as_deref() == Some(supplier_id) {
                    grouped.entry(order.status).or_default().push(order.clone());
                }
            }
        }
        for bucket in grouped.values_mut() {
            bucket.sort_by(|a, b| a.id.cmp(&b.id));
        }
        grouped
    }

    // ==================== Supplier cart (local edits) ====================

    /// Set a requested quantity in the merchant's cart; 0 removes the line
    pub fn set_cart_quantity(
        &self,
        merchant_id: &str,
        supplier_id: &str,
        item_id: &str,
        quantity: u32,
    ) {
        let mut carts = self.carts.write();
        let cart = carts.entry(merchant_id.to_string()).or_default();
        let lines = cart.entry(supplier_id.to_string()).or_default();
        if quantity == 0 {
            lines.remove(item_id);
            if lines.is_empty() {
                cart.remove(supplier_id);
            }
        } else {
            lines.insert(item_id.to_string(), quantity);
        }
    }

    /// Current cart view for a merchant session
    pub fn cart_projection(&self, merchant_id: &str) -> SupplierCartView {
        self.carts
            .read()
            .get(merchant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Lines to submit for one supplier; the cart itself is untouched
    /// until the server acknowledges and the caller clears it
    pub fn submission_lines(&self, merchant_id: &str, supplier_id: &str) -> Vec<(String, u32)> {
        self.carts
            .read()
            .get(merchant_id)
            .and_then(|cart| cart.get(supplier_id))
            .map(|lines| lines.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// Drop a supplier's cart lines after an acknowledged submission
    pub fn clear_cart(&self, merchant_id: &str, supplier_id: &str) {
        if let Some(cart) = self.carts.write().get_mut(merchant_id) {
            cart.remove(supplier_id);
        }
    }
}
