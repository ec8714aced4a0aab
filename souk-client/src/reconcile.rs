//! Reconciliation engine - the single owner of authoritative client state
//!
//! All ordering, duplication, and partial-failure semantics are resolved
//! here and nowhere else. The merge rule:
//!
//! 1. Look up the entity by id within the event's tenant scope.
//! 2. Absent entity: insert for created-class events; buffer
//!    updated/cancelled events pending the creating event or a snapshot.
//! 3. Present entity: apply only if `event.version > entity.version`,
//!    otherwise discard as a duplicate/stale replay.
//! 4. Order status moves must stay on the allowed transition graph;
//!    violators are dropped with the entity left unchanged.
//! 5. Buffered events older than the configured window (count or age)
//!    are discarded and marked for a targeted resync of their entity.
//!
//! The engine never invokes consumer callbacks and never performs I/O;
//! callers act on the returned [`MergeReport`] after the lock is released,
//! which is what makes nested dispatch (a callback subscribing or marking
//! reads) safe.

use parking_lot::RwLock;
use shared::channel::ChannelScope;
use shared::error::SyncError;
use shared::event::NormalizedEvent;
use shared::models::{Notification, Order, OrderStatus};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Bounds for the out-of-order pending buffer (per channel)
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    pub max_entries: usize,
    pub max_age: Duration,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_age: Duration::from_secs(30),
        }
    }
}

/// A state change that actually applied, for fan-out to consumers
#[derive(Debug, Clone)]
pub enum AppliedChange {
    Order(Order),
    Notification {
        notification: Notification,
        /// First time this notification became visible
        created: bool,
        /// Read flag flipped on by this merge
        read: bool,
    },
}

/// What the merge did with the incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Applied,
    Duplicate,
    Buffered,
    Rejected,
}

/// Outcome of one merge (or one snapshot application)
#[derive(Debug)]
pub struct MergeReport {
    pub status: MergeStatus,
    /// Changes to fan out, in application order
    pub applied: Vec<AppliedChange>,
    /// Entity ids whose buffered events were evicted - targeted resync due
    pub resync: Vec<String>,
}

impl MergeReport {
    fn new(status: MergeStatus) -> Self {
        Self {
            status,
            applied: Vec::new(),
            resync: Vec::new(),
        }
    }
}

struct PendingEvent {
    event: NormalizedEvent,
    entity_id: String,
    buffered_at: Instant,
}

/// A NotificationRead observed before its NotificationCreated
struct ReadAhead {
    sequence: u64,
    buffered_at: Instant,
}

#[derive(Default)]
struct EngineState {
    orders: HashMap<ChannelScope, HashMap<String, Order>>,
    notifications: HashMap<ChannelScope, HashMap<String, Notification>>,
    /// Orphaned reads pending their create, keyed by channel id;
    /// bounded by the same limits as `pending`
    read_ahead: HashMap<String, HashMap<String, ReadAhead>>,
    /// Buffered out-of-order events, keyed by channel id
    pending: HashMap<String, VecDeque<PendingEvent>>,
    /// Last server epoch seen per channel
    epochs: HashMap<String, String>,
    /// Last applied sequence per channel
    last_sequence: HashMap<String, u64>,
    /// Running count of rejected transitions (observability)
    rejected_transitions: u64,
}

/// The reconciliation engine
///
/// Shared across channel tasks; each channel's events are merged by a
/// single task, so per-entity merges are never concurrent, but reads may
/// come from any consumer thread.
#[derive(Default)]
pub struct ReconcileEngine {
    limits: BufferLimits,
    state: RwLock<EngineState>,
}

impl std::fmt::Debug for ReconcileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("limits", &self.limits)
            .finish()
    }
}

impl ReconcileEngine {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            limits,
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Merge one normalized event into the authoritative collections
    pub fn merge(&self, event: NormalizedEvent) -> MergeReport {
        let channel = event.scope().channel_id();
        let sequence = event.sequence();

        let mut state = self.state.write();
        let mut report = self.sweep_expired(&mut state, &channel);

        self.merge_locked(&mut state, event, &mut report);

        let last = state.last_sequence.entry(channel).or_insert(0);
        *last = (*last).max(sequence);
        report
    }

    /// Apply a resync snapshot for one channel
    ///
    /// An epoch change means the server restarted: buffered events from
    /// the old epoch can never apply and are discarded outright.
    pub fn apply_snapshot(
        &self,
        channel: &str,
        epoch: &str,
        events: Vec<NormalizedEvent>,
        server_sequence: u64,
    ) -> MergeReport {
        let mut state = self.state.write();
        let mut report = MergeReport::new(MergeStatus::Applied);

        let old_epoch = state.epochs.get(channel).cloned();
        if let Some(old) = old_epoch.filter(|known| known != epoch) {
            let dropped = state
                .pending
                .remove(channel)
                .map(|buffer| buffer.len())
                .unwrap_or(0);
            let dropped_reads = state
                .read_ahead
                .remove(channel)
                .map(|buffer| buffer.len())
                .unwrap_or(0);
            tracing::info!(
                channel,
                old_epoch = %old,
                new_epoch = %epoch,
                dropped,
                dropped_reads,
                "server epoch changed, discarding pending buffers"
            );
        }
        state.epochs.insert(channel.to_string(), epoch.to_string());

        for event in events {
            self.merge_locked(&mut state, event, &mut report);
        }

        let last = state.last_sequence.entry(channel.to_string()).or_insert(0);
        *last = (*last).max(server_sequence);
        report
    }

    /// Locally mark a notification read (fire-and-forget write path)
    ///
    /// The server's own `NotificationRead` event confirms later; a local
    /// read is never resurrected by replays in the meantime.
    pub fn mark_read_local(&self, notification_id: &str) -> Option<(ChannelScope, AppliedChange)> {
        let mut state = self.state.write();
        for (scope, notifications) in state.notifications.iter_mut() {
            if let Some(n) = notifications.get_mut(notification_id) {
                if n.read {
                    return None;
                }
                n.read = true;
                return Some((
                    scope.clone(),
                    AppliedChange::Notification {
                        notification: n.clone(),
                        created: false,
                        read: true,
                    },
                ));
            }
        }
        None
    }

    // ==================== Reads ====================

    pub fn orders(&self, scope: &ChannelScope) -> Vec<Order> {
        let state = self.state.read();
        let mut orders: Vec<Order> = state
            .orders
            .get(scope)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    pub fn order(&self, scope: &ChannelScope, order_id: &str) -> Option<Order> {
        self.state
            .read()
            .orders
            .get(scope)
            .and_then(|m| m.get(order_id))
            .cloned()
    }

    pub fn notifications(&self, scope: &ChannelScope) -> Vec<Notification> {
        let state = self.state.read();
        let mut notifications: Vec<Notification> = state
            .notifications
            .get(scope)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        notifications.sort_by_key(|n| n.created_sequence);
        notifications
    }

    pub fn unread_count(&self, scope: &ChannelScope) -> usize {
        self.state
            .read()
            .notifications
            .get(scope)
            .map(|m| m.values().filter(|n| !n.read).count())
            .unwrap_or(0)
    }

    pub fn find_notification_scope(&self, notification_id: &str) -> Option<ChannelScope> {
        let state = self.state.read();
        state
            .notifications
            .iter()
            .find(|(_, m)| m.contains_key(notification_id))
            .map(|(scope, _)| scope.clone())
    }

    /// Last applied sequence for a channel
    pub fn last_sequence(&self, channel: &str) -> u64 {
        self.state
            .read()
            .last_sequence
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Rejected-transition counter (observability)
    pub fn rejected_transition_count(&self) -> u64 {
        self.state.read().rejected_transitions
    }

    // ==================== Merge internals ====================

    fn merge_locked(
        &self,
        state: &mut EngineState,
        event: NormalizedEvent,
        report: &mut MergeReport,
    ) {
        match event {
            NormalizedEvent::OrderCreated { order, .. } => {
                let id = order.id.clone();
                let channel = order.scope.channel_id();
                self.upsert_order(state, order, report);
                self.drain_pending(state, &channel, &id, report);
            }
            NormalizedEvent::OrderUpdated { order, sequence } => {
                let exists = state
                    .orders
                    .get(&order.scope)
                    .is_some_and(|m| m.contains_key(&order.id));
                if exists {
                    self.apply_order(state, order, report);
                } else {
                    self.buffer_event(
                        state,
                        NormalizedEvent::OrderUpdated { order, sequence },
                        report,
                    );
                }
            }
            NormalizedEvent::OrderCancelled {
                order_id,
                scope,
                version,
                sequence,
            } => {
                let existing = state
                    .orders
                    .get(&scope)
                    .and_then(|m| m.get(&order_id))
                    .cloned();
                match existing {
                    Some(current) => {
                        let mut cancelled = current;
                        cancelled.status = OrderStatus::Cancelled;
                        cancelled.version = version;
                        cancelled.last_sequence = sequence;
                        self.apply_order(state, cancelled, report);
                    }
                    None => self.buffer_event(
                        state,
                        NormalizedEvent::OrderCancelled {
                            order_id,
                            scope,
                            version,
                            sequence,
                        },
                        report,
                    ),
                }
            }
            NormalizedEvent::NotificationCreated { notification, .. } => {
                self.merge_notification_created(state, notification, report);
            }
            NormalizedEvent::NotificationRead {
                notification_id,
                scope,
                sequence,
            } => {
                self.merge_notification_read(state, &scope, &notification_id, sequence, report);
            }
        }
    }

    /// Created-class order merge: insert when absent, version-rule update
    /// when present (this is what makes snapshot replays an upsert)
    fn upsert_order(&self, state: &mut EngineState, order: Order, report: &mut MergeReport) {
        let exists = state
            .orders
            .get(&order.scope)
            .is_some_and(|m| m.contains_key(&order.id));
        if exists {
            self.apply_order(state, order, report);
        } else {
            tracing::debug!(order_id = %order.id, version = order.version, "order created");
            report.applied.push(AppliedChange::Order(order.clone()));
            state
                .orders
                .entry(order.scope.clone())
                .or_default()
                .insert(order.id.clone(), order);
            report.status = MergeStatus::Applied;
        }
    }

    /// Version-gated, transition-checked in-place update
    fn apply_order(&self, state: &mut EngineState, incoming: Order, report: &mut MergeReport) {
        let Some(current) = state
            .orders
            .get_mut(&incoming.scope)
            .and_then(|m| m.get_mut(&incoming.id))
        else {
            return;
        };

        if incoming.version <= current.version {
            tracing::debug!(
                order_id = %incoming.id,
                incoming = incoming.version,
                current = current.version,
                "stale replay discarded"
            );
            report.status = MergeStatus::Duplicate;
            return;
        }

        if !current.status.can_transition_to(incoming.status) {
            let err = SyncError::InvalidTransition {
                order_id: incoming.id.clone(),
                from: current.status,
                to: incoming.status,
            };
            tracing::warn!(error = %err, "transition rejected, entity unchanged");
            state.rejected_transitions += 1;
            report.status = MergeStatus::Rejected;
            return;
        }

        *current = incoming;
        report.applied.push(AppliedChange::Order(current.clone()));
        report.status = MergeStatus::Applied;
    }

    fn merge_notification_created(
        &self,
        state: &mut EngineState,
        mut incoming: Notification,
        report: &mut MergeReport,
    ) {
        let scope = incoming.scope.clone();
        let read_ahead = state
            .read_ahead
            .get_mut(&scope.channel_id())
            .and_then(|buffer| buffer.remove(&incoming.id));

        let scoped = state.notifications.entry(scope).or_default();
        match scoped.get_mut(&incoming.id) {
            None => {
                // a read observed before the create still lands read
                if let Some(read_ahead) = read_ahead {
                    incoming.mark_read(read_ahead.sequence);
                }
                let read = incoming.read;
                report.applied.push(AppliedChange::Notification {
                    notification: incoming.clone(),
                    created: true,
                    read,
                });
                scoped.insert(incoming.id.clone(), incoming);
                report.status = MergeStatus::Applied;
            }
            Some(existing) => {
                if incoming.created_sequence > existing.created_sequence {
                    // re-issued notification; keep read state the replay
                    // is not allowed to clear
                    let guard = existing.read_sequence.unwrap_or(u64::MAX);
                    if existing.read && !incoming.read && incoming.created_sequence <= guard {
                        incoming.read = true;
                        incoming.read_sequence = existing.read_sequence;
                    }
                    *existing = incoming;
                    report.status = MergeStatus::Applied;
                } else if incoming.read && !existing.read {
                    // same-version replay carrying a read flag from
                    // another session (snapshot path)
                    existing.mark_read(incoming.read_sequence.unwrap_or(existing.created_sequence));
                    report.applied.push(AppliedChange::Notification {
                        notification: existing.clone(),
                        created: false,
                        read: true,
                    });
                    report.status = MergeStatus::Applied;
                } else {
                    report.status = MergeStatus::Duplicate;
                }
            }
        }
    }

    fn merge_notification_read(
        &self,
        state: &mut EngineState,
        scope: &ChannelScope,
        notification_id: &str,
        sequence: u64,
        report: &mut MergeReport,
    ) {
        let scoped = state.notifications.entry(scope.clone()).or_default();
        match scoped.get_mut(notification_id) {
            Some(n) if !n.read => {
                n.mark_read(sequence);
                report.applied.push(AppliedChange::Notification {
                    notification: n.clone(),
                    created: false,
                    read: true,
                });
                report.status = MergeStatus::Applied;
            }
            Some(n) => {
                n.mark_read(sequence);
                report.status = MergeStatus::Duplicate;
            }
            None => {
                // read arrived before the create (another session)
                let buffer = state.read_ahead.entry(scope.channel_id()).or_default();
                let entry = buffer
                    .entry(notification_id.to_string())
                    .or_insert(ReadAhead {
                        sequence,
                        buffered_at: Instant::now(),
                    });
                entry.sequence = entry.sequence.max(sequence);
                report.status = MergeStatus::Buffered;

                // same count bound as the order pending buffer: evict the
                // oldest orphaned read and ask the server for its entity
                while buffer.len() > self.limits.max_entries {
                    let oldest = buffer
                        .iter()
                        .min_by_key(|(_, entry)| entry.buffered_at)
                        .map(|(id, _)| id.clone());
                    let Some(id) = oldest else { break };
                    buffer.remove(&id);
                    let err = SyncError::BufferOverflowResync {
                        entity_id: id.clone(),
                    };
                    tracing::warn!(error = %err, "orphaned read buffer overflow");
                    if !report.resync.contains(&id) {
                        report.resync.push(id);
                    }
                }
            }
        }
    }

    /// Buffer an update-class event whose entity has not been seen yet
    fn buffer_event(&self, state: &mut EngineState, event: NormalizedEvent, report: &mut MergeReport) {
        let channel = event.scope().channel_id();
        let entity_id = event.entity_id().to_string();
        tracing::debug!(channel = %channel, entity_id = %entity_id, "event buffered pending create");

        let buffer = state.pending.entry(channel).or_default();
        buffer.push_back(PendingEvent {
            event,
            entity_id,
            buffered_at: Instant::now(),
        });
        report.status = MergeStatus::Buffered;

        while buffer.len() > self.limits.max_entries {
            if let Some(evicted) = buffer.pop_front() {
                let err = SyncError::BufferOverflowResync {
                    entity_id: evicted.entity_id.clone(),
                };
                tracing::warn!(error = %err, "pending buffer overflow");
                if !report.resync.contains(&evicted.entity_id) {
                    report.resync.push(evicted.entity_id);
                }
            }
        }
    }

    /// Replay buffered events for an entity that just got created
    fn drain_pending(
        &self,
        state: &mut EngineState,
        channel: &str,
        entity_id: &str,
        report: &mut MergeReport,
    ) {
        let Some(buffer) = state.pending.get_mut(channel) else {
            return;
        };

        let mut matched: Vec<PendingEvent> = Vec::new();
        let mut rest: VecDeque<PendingEvent> = VecDeque::with_capacity(buffer.len());
        for entry in buffer.drain(..) {
            if entry.entity_id == entity_id {
                matched.push(entry);
            } else {
                rest.push_back(entry);
            }
        }
        *buffer = rest;

        // lowest version first so intermediate states apply in order
        matched.sort_by_key(|p| p.event.version());
        for entry in matched {
            let mut sub = MergeReport::new(MergeStatus::Applied);
            self.merge_locked(state, entry.event, &mut sub);
            report.applied.append(&mut sub.applied);
            report.resync.append(&mut sub.resync);
        }
    }

    /// Evict over-age buffered events and orphaned reads, marking their
    /// entities for resync
    ///
    /// Runs at the head of each merge for the channel; an idle channel
    /// holds its aged entries until the next event arrives.
    fn sweep_expired(&self, state: &mut EngineState, channel: &str) -> MergeReport {
        let mut report = MergeReport::new(MergeStatus::Applied);
        let max_age = self.limits.max_age;

        if let Some(buffer) = state.pending.get_mut(channel) {
            let mut kept = VecDeque::with_capacity(buffer.len());
            for entry in buffer.drain(..) {
                if entry.buffered_at.elapsed() > max_age {
                    let err = SyncError::BufferOverflowResync {
                        entity_id: entry.entity_id.clone(),
                    };
                    tracing::warn!(channel, error = %err, "aged-out pending event evicted");
                    if !report.resync.contains(&entry.entity_id) {
                        report.resync.push(entry.entity_id.clone());
                    }
                } else {
                    kept.push_back(entry);
                }
            }
            *buffer = kept;
        }

        if let Some(buffer) = state.read_ahead.get_mut(channel) {
            buffer.retain(|id, entry| {
                if entry.buffered_at.elapsed() > max_age {
                    let err = SyncError::BufferOverflowResync {
                        entity_id: id.clone(),
                    };
                    tracing::warn!(channel, error = %err, "aged-out orphaned read evicted");
                    if !report.resync.contains(id) {
                        report.resync.push(id.clone());
                    }
                    false
                } else {
                    true
                }
            });
        }

        report
    }
}
