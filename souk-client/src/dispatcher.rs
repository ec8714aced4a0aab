//! Notification fan-out
//!
//! Delivers reconciled notification changes to registered consumers,
//! exactly once per logical notification id per state transition
//! (created, then optionally read).
//!
//! Unsubscribe is synchronous: the handle's liveness flag is cleared
//! before the subscriber is removed, and the flag is re-checked
//! immediately before every callback invocation. A consumer that
//! unsubscribes mid-dispatch - even from inside its own callback -
//! receives zero further deliveries.

use dashmap::DashMap;
use shared::channel::ChannelScope;
use shared::models::Notification;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Notification callback type
pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscriber {
    scope: ChannelScope,
    alive: Arc<AtomicBool>,
    callback: NotificationCallback,
}

#[derive(Default)]
struct DeliveredState {
    created: bool,
    read: bool,
}

/// Fan-out of notification state transitions to consumer callbacks
#[derive(Default)]
pub struct NotificationDispatcher {
    subscribers: DashMap<Uuid, Subscriber>,
    delivered: DashMap<String, DeliveredState>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one scope; returns the handle id and its
    /// liveness flag
    pub fn subscribe(
        &self,
        scope: ChannelScope,
        callback: NotificationCallback,
    ) -> (Uuid, Arc<AtomicBool>) {
        let id = Uuid::new_v4();
        let alive = Arc::new(AtomicBool::new(true));
        self.subscribers.insert(
            id,
            Subscriber {
                scope,
                alive: alive.clone(),
                callback,
            },
        );
        (id, alive)
    }

    /// Remove a subscriber; no deliveries happen after this returns
    pub fn unsubscribe(&self, id: &Uuid) {
        if let Some(subscriber) = self.subscribers.get(id) {
            subscriber.alive.store(false, Ordering::SeqCst);
        }
        self.subscribers.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver one reconciled notification change
    ///
    /// `created`/`read` describe which transitions this change carries;
    /// transitions already delivered for the id are suppressed.
    pub fn dispatch(&self, notification: &Notification, created: bool, read: bool) {
        let (deliver_created, deliver_read) = {
            let mut state = self.delivered.entry(notification.id.clone()).or_default();
            let deliver_created = created && !state.created;
            let deliver_read = read && !state.read;
            state.created |= created;
            state.read |= read;
            (deliver_created, deliver_read)
        };

        if !deliver_created && !deliver_read {
            return;
        }

        // snapshot the subscriber list so no map lock is held while
        // callbacks run (they may re-enter subscribe/unsubscribe)
        let targets: Vec<(Arc<AtomicBool>, NotificationCallback)> = self
            .subscribers
            .iter()
            .filter(|entry| entry.scope == notification.scope)
            .map(|entry| (entry.alive.clone(), entry.callback.clone()))
            .collect();

        let deliveries = if deliver_created && deliver_read { 2 } else { 1 };
        for _ in 0..deliveries {
            for (alive, callback) in &targets {
                if alive.load(Ordering::SeqCst) {
                    callback(notification);
                }
            }
        }
    }
}
