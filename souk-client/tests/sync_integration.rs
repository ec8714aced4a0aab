// souk-client/tests/sync_integration.rs
// End-to-end sync scenarios over the in-memory transport

use parking_lot::Mutex;
use shared::event::RawEvent;
use souk_client::{
    ChannelScope, ChannelState, MemoryHub, OrderStatus, StaticAuthorizer, SyncClient, SyncConfig,
    SyncError,
};
use std::sync::Arc;
use std::time::Duration;

// ==================== helpers ====================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn order_event(
    channel: &str,
    kind: &str,
    id: &str,
    status: &str,
    version: u64,
    sequence: u64,
) -> RawEvent {
    RawEvent {
        channel: channel.to_string(),
        kind: kind.to_string(),
        entity: serde_json::json!({
            "id": id,
            "status": status,
            "supplier_id": "s-1",
            "items": [{ "item_id": "i-1", "name": "Olive oil 1L", "quantity": 2, "unit_price": 8.5 }],
        }),
        version,
        sequence,
    }
}

fn cancel_event(channel: &str, id: &str, version: u64, sequence: u64) -> RawEvent {
    RawEvent {
        channel: channel.to_string(),
        kind: "ORDER_CANCELLED".to_string(),
        entity: serde_json::json!({ "id": id }),
        version,
        sequence,
    }
}

fn notification_event(channel: &str, id: &str, sequence: u64) -> RawEvent {
    RawEvent {
        channel: channel.to_string(),
        kind: "NOTIFICATION_CREATED".to_string(),
        entity: serde_json::json!({
            "id": id,
            "kind": "order",
            "title": "Order update",
            "body": "an order changed",
        }),
        version: sequence,
        sequence,
    }
}

fn read_event(channel: &str, id: &str, sequence: u64) -> RawEvent {
    RawEvent {
        channel: channel.to_string(),
        kind: "NOTIFICATION_READ".to_string(),
        entity: serde_json::json!({ "id": id }),
        version: sequence,
        sequence,
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig::lan().with_reconnect_delay(Duration::from_millis(10))
}

/// Client + hub wired for one merchant scope, connected and ready
async fn connected_client(hub: &MemoryHub, scope: &ChannelScope) -> (SyncClient, souk_client::Subscription) {
    init_tracing();
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(StaticAuthorizer::new().allow(scope.clone())),
    );
    let subscription = client
        .subscribe_orders(scope.clone(), Arc::new(|_| {}))
        .unwrap();
    client
        .connection_state(scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();
    (client, subscription)
}

// ==================== scenarios ====================

#[tokio::test]
async fn test_reordered_updates_converge() {
    // Created(v1), Updated(v3), Updated(v2) arrive reordered -> v3 wins
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;

    let ch = scope.channel_id();
    hub.publish(order_event(&ch, "ORDER_CREATED", "o-1", "PLACED", 1, 1));
    hub.publish(order_event(&ch, "ORDER_UPDATED", "o-1", "PREPARING", 3, 3));
    hub.publish(order_event(&ch, "ORDER_UPDATED", "o-1", "CONFIRMED", 2, 2));

    eventually("order reaches v3", || {
        client
            .order(&scope, "o-1")
            .is_some_and(|o| o.version == 3)
    })
    .await;

    let order = client.order(&scope, "o-1").unwrap();
    assert_eq!(order.status, OrderStatus::Preparing);
}

#[tokio::test]
async fn test_update_before_create_buffers_then_applies() {
    // Updated(v2) races ahead of Created(v1)
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;

    let ch = scope.channel_id();
    hub.publish(order_event(&ch, "ORDER_UPDATED", "x", "CONFIRMED", 2, 2));
    hub.publish(order_event(&ch, "ORDER_CREATED", "x", "PLACED", 1, 1));

    eventually("buffered update applied after create", || {
        client.order(&scope, "x").is_some_and(|o| o.version == 2)
    })
    .await;
    assert_eq!(client.order(&scope, "x").unwrap().status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn test_reconnect_snapshot_discards_stale_buffered_update() {
    // drop mid-stream, snapshot at v5, stale buffered v3 must die
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;
    let ch = scope.channel_id();

    // stale update for an order we never saw created
    hub.publish(order_event(&ch, "ORDER_UPDATED", "o-9", "CONFIRMED", 3, 3));
    eventually("update buffered", || client.order(&scope, "o-9").is_none()).await;

    // server-side truth is v5; connection drops and resyncs
    hub.set_snapshot(
        ch.as_str(),
        vec![shared::sync::SnapshotEntity::Order(shared::models::Order {
            id: "o-9".to_string(),
            scope: scope.clone(),
            supplier_id: Some("s-1".to_string()),
            status: OrderStatus::Ready,
            version: 5,
            items: vec![],
            last_sequence: 5,
        })],
        5,
    );
    hub.drop_connections();

    eventually("snapshot applied at v5", || {
        client.order(&scope, "o-9").is_some_and(|o| o.version == 5)
    })
    .await;
    assert_eq!(client.order(&scope, "o-9").unwrap().status, OrderStatus::Ready);
}

#[tokio::test]
async fn test_read_from_other_session_before_create() {
    // NotificationRead for n-1 lands before its create
    init_tracing();
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(StaticAuthorizer::new().allow(scope.clone())),
    );

    let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let _sub = client
        .subscribe_notifications(
            scope.clone(),
            Arc::new(move |n| seen2.lock().push((n.id.clone(), n.read))),
        )
        .unwrap();
    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    let ch = scope.channel_id();
    hub.publish(read_event(&ch, "n-1", 12));
    hub.publish(notification_event(&ch, "n-1", 10));

    eventually("notification created as read", || {
        !seen.lock().is_empty()
    })
    .await;
    assert_eq!(client.unread_count(&scope), 0);
    // the first delivery already carries read state
    assert_eq!(seen.lock()[0], ("n-1".to_string(), true));
}

#[tokio::test]
async fn test_unsubscribe_mid_dispatch_stops_deliveries() {
    // unsubscribe fired from inside a delivery callback
    init_tracing();
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(StaticAuthorizer::new().allow(scope.clone())),
    );

    let keeper_count = Arc::new(Mutex::new(0usize));
    let quitter_count = Arc::new(Mutex::new(0usize));
    let quitter_sub: Arc<Mutex<Option<souk_client::Subscription>>> = Arc::new(Mutex::new(None));

    let kc = keeper_count.clone();
    let _keeper = client
        .subscribe_notifications(scope.clone(), Arc::new(move |_| *kc.lock() += 1))
        .unwrap();

    let qc = quitter_count.clone();
    let qs = quitter_sub.clone();
    let sub = client
        .subscribe_notifications(
            scope.clone(),
            Arc::new(move |_| {
                *qc.lock() += 1;
                // unsubscribe from inside the first delivery
                drop(qs.lock().take());
            }),
        )
        .unwrap();
    *quitter_sub.lock() = Some(sub);

    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    let ch = scope.channel_id();
    hub.publish(notification_event(&ch, "n-1", 1));
    hub.publish(notification_event(&ch, "n-2", 2));
    hub.publish(notification_event(&ch, "n-3", 3));

    eventually("keeper saw all three", || *keeper_count.lock() == 3).await;
    // unsubscribing handle saw exactly the delivery it quit during
    assert_eq!(*quitter_count.lock(), 1);
    // keeper's channel survived the other handle's unsubscribe
    assert_eq!(client.notifications(&scope).len(), 3);
}

// ==================== connection behavior ====================

#[tokio::test]
async fn test_outage_shows_backoff_and_last_known_good_state() {
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;
    let ch = scope.channel_id();

    hub.publish(order_event(&ch, "ORDER_CREATED", "o-1", "PLACED", 1, 1));
    eventually("order arrived", || client.order(&scope, "o-1").is_some()).await;

    // outage: connections drop and reconnects are refused
    hub.set_accepting(false);
    hub.drop_connections();

    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Backoff)
        .await
        .unwrap();

    // stale but consistent reads during backoff
    assert_eq!(client.orders(&scope).len(), 1);

    // recovery
    hub.set_accepting(true);
    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    hub.publish(order_event(&ch, "ORDER_UPDATED", "o-1", "CONFIRMED", 2, 2));
    eventually("post-recovery update applied", || {
        client.order(&scope, "o-1").is_some_and(|o| o.version == 2)
    })
    .await;
}

#[tokio::test]
async fn test_server_restart_discards_old_epoch_buffer() {
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;
    let ch = scope.channel_id();

    // orphaned update buffered under epoch-1
    hub.publish(order_event(&ch, "ORDER_UPDATED", "ghost", "CONFIRMED", 7, 7));
    eventually("update buffered", || client.order(&scope, "ghost").is_none()).await;

    // restart resets the server's sequence space
    hub.restart_with_epoch("epoch-2");

    // republish until the reconnected stream picks it up - duplicates
    // are harmless by the idempotence rule
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while client.order(&scope, "ghost").is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "create never applied after restart"
        );
        hub.publish(order_event(&ch, "ORDER_CREATED", "ghost", "PLACED", 1, 1));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // the old-epoch v7 never applies
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.order(&scope, "ghost").unwrap().version, 1);
}

#[tokio::test]
async fn test_channels_are_isolated() {
    init_tracing();
    let hub = MemoryHub::new();
    let merchant = ChannelScope::merchant("m-1");
    let supplier = ChannelScope::supplier("s-1");
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(
            StaticAuthorizer::new()
                .allow(merchant.clone())
                .allow(supplier.clone()),
        ),
    );

    let _m = client.subscribe_orders(merchant.clone(), Arc::new(|_| {})).unwrap();
    let _s = client.subscribe_orders(supplier.clone(), Arc::new(|_| {})).unwrap();
    client
        .connection_state(&merchant)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();
    client
        .connection_state(&supplier)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    hub.publish(order_event(
        &merchant.channel_id(),
        "ORDER_CREATED",
        "o-1",
        "PLACED",
        1,
        1,
    ));
    hub.publish(order_event(
        &supplier.channel_id(),
        "ORDER_CREATED",
        "o-2",
        "PLACED",
        1,
        2,
    ));

    eventually("both scopes populated", || {
        client.order(&merchant, "o-1").is_some() && client.order(&supplier, "o-2").is_some()
    })
    .await;
    assert!(client.order(&merchant, "o-2").is_none());
    assert!(client.order(&supplier, "o-1").is_none());

    // unauthorized role for the same tenant id stays rejected
    let result = client.subscribe_orders(ChannelScope::cooperative("m-1"), Arc::new(|_| {}));
    assert!(matches!(result, Err(SyncError::UnauthorizedScope(_))));
}

#[tokio::test]
async fn test_cancelled_order_keeps_items_and_terminal_state() {
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;
    let ch = scope.channel_id();

    hub.publish(order_event(&ch, "ORDER_CREATED", "o-1", "PLACED", 1, 1));
    hub.publish(cancel_event(&ch, "o-1", 2, 2));
    // a late reordered update must not escape the terminal state
    hub.publish(order_event(&ch, "ORDER_UPDATED", "o-1", "PREPARING", 3, 3));

    eventually("cancel applied", || {
        client
            .order(&scope, "o-1")
            .is_some_and(|o| o.status == OrderStatus::Cancelled)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let order = client.order(&scope, "o-1").unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.version, 2);
    assert_eq!(order.items.len(), 1);
}

// ==================== notifications and carts ====================

#[tokio::test]
async fn test_mark_read_sends_receipt_and_updates_locally() {
    init_tracing();
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(StaticAuthorizer::new().allow(scope.clone())),
    );

    let reads = Arc::new(Mutex::new(0usize));
    let reads2 = reads.clone();
    let _sub = client
        .subscribe_notifications(
            scope.clone(),
            Arc::new(move |n| {
                if n.read {
                    *reads2.lock() += 1;
                }
            }),
        )
        .unwrap();
    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    hub.publish(notification_event(&scope.channel_id(), "n-1", 5));
    eventually("notification arrived", || {
        client.unread_count(&scope) == 1
    })
    .await;

    client.mark_notification_read("n-1");
    eventually("read applied locally", || client.unread_count(&scope) == 0).await;
    eventually("receipt reached server", || {
        hub.receipts() == vec!["n-1".to_string()]
    })
    .await;
    assert_eq!(*reads.lock(), 1);
}

#[tokio::test]
async fn test_order_projections_and_cart() {
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let (client, _sub) = connected_client(&hub, &scope).await;
    let ch = scope.channel_id();

    hub.publish(order_event(&ch, "ORDER_CREATED", "o-1", "PLACED", 1, 1));
    hub.publish(order_event(&ch, "ORDER_CREATED", "o-2", "READY", 1, 2));
    eventually("orders projected", || {
        client.orders_for_supplier(&scope, "s-1").len() == 2
    })
    .await;

    let grouped = client.orders_for_supplier(&scope, "s-1");
    assert_eq!(grouped[&OrderStatus::Placed].len(), 1);
    assert_eq!(grouped[&OrderStatus::Ready].len(), 1);

    // merchant-local cart never touches the synchronized orders
    client.set_cart_quantity("m-1", "s-1", "i-1", 4);
    client.set_cart_quantity("m-1", "s-7", "i-2", 1);
    let cart = client.cart_projection("m-1");
    assert_eq!(cart["s-1"]["i-1"], 4);
    assert_eq!(client.submission_lines("m-1", "s-1"), vec![("i-1".to_string(), 4)]);
    assert_eq!(client.orders(&scope).len(), 2);

    client.clear_cart("m-1", "s-1");
    assert!(!client.cart_projection("m-1").contains_key("s-1"));
}

#[tokio::test]
async fn test_shared_channel_survives_partial_unsubscribe() {
    init_tracing();
    let hub = MemoryHub::new();
    let scope = ChannelScope::merchant("m-1");
    let client = SyncClient::with_config(
        fast_config(),
        Arc::new(hub.transport()),
        Arc::new(StaticAuthorizer::new().allow(scope.clone())),
    );

    let orders_seen = Arc::new(Mutex::new(0usize));
    let oc = orders_seen.clone();
    let orders_sub = client
        .subscribe_orders(scope.clone(), Arc::new(move |_| *oc.lock() += 1))
        .unwrap();
    let notif_sub = client
        .subscribe_notifications(scope.clone(), Arc::new(|_| {}))
        .unwrap();

    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Connected)
        .await
        .unwrap();

    // dropping one consumer must not tear down the shared channel
    notif_sub.unsubscribe();
    hub.publish(order_event(
        &scope.channel_id(),
        "ORDER_CREATED",
        "o-1",
        "PLACED",
        1,
        1,
    ));
    eventually("order delivered after partial unsubscribe", || {
        *orders_seen.lock() == 1
    })
    .await;

    // last consumer closes the channel
    orders_sub.unsubscribe();
    client
        .connection_state(&scope)
        .wait_for(|s| *s == ChannelState::Disconnected)
        .await
        .unwrap();
}
