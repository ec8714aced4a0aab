//! Channel registry - subscription refcounting and channel lifecycle
//!
//! Maps a (tenant-role, tenant-id) scope to its logical channel and
//! reference-counts subscribers. The underlying connection is opened
//! only on the 0→1 transition and torn down only on 1→0; intermediate
//! subscribes and unsubscribes just move the count. Teardown cancels
//! the channel's token, which also aborts any in-flight backoff timer -
//! no reconnect attempts outlive the last consumer.
//!
//! Authorization is checked here, synchronously, before any channel
//! state is touched; an unauthorized scope never allocates anything.

use crate::config::SyncConfig;
use crate::connection::{ChannelMessage, StreamConnection};
use crate::session::ScopeAuthorizer;
use crate::transport::Transport;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::channel::{ChannelScope, ChannelState};
use shared::error::SyncError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

struct ChannelEntry {
    refcount: usize,
    cancel: CancellationToken,
    state_rx: watch::Receiver<ChannelState>,
    queue_tx: mpsc::UnboundedSender<ChannelMessage>,
    receipt_tx: mpsc::UnboundedSender<String>,
}

/// Result of acquiring a channel slot
pub(crate) enum Acquired {
    /// First subscriber: the caller must spawn the reconcile task on the
    /// returned queue receiver
    Opened {
        queue_rx: mpsc::UnboundedReceiver<ChannelMessage>,
        resync_tx: mpsc::UnboundedSender<Vec<String>>,
    },
    /// Channel was already live
    Joined,
}

pub(crate) struct ChannelRegistry {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn ScopeAuthorizer>,
    channels: DashMap<String, ChannelEntry>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl ChannelRegistry {
    pub(crate) fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn ScopeAuthorizer>,
    ) -> Self {
        Self {
            config,
            transport,
            authorizer,
            channels: DashMap::new(),
        }
    }

    /// Take one subscriber slot on the scope's channel, opening it on
    /// the 0→1 transition
    pub(crate) fn acquire(&self, scope: &ChannelScope) -> Result<Acquired, SyncError> {
        if !self.authorizer.is_authorized(scope) {
            return Err(SyncError::UnauthorizedScope(scope.clone()));
        }

        let channel_id = scope.channel_id();
        match self.channels.entry(channel_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.refcount += 1;
                tracing::debug!(channel = %channel_id, refcount = entry.refcount, "joined channel");
                Ok(Acquired::Joined)
            }
            Entry::Vacant(vacant) => {
                let (queue_tx, queue_rx) = mpsc::unbounded_channel();
                let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
                let (resync_tx, resync_rx) = mpsc::unbounded_channel();
                let (receipt_tx, receipt_rx) = mpsc::unbounded_channel();
                let cancel = CancellationToken::new();

                let connection = StreamConnection::new(
                    channel_id.clone(),
                    self.config.clone(),
                    self.transport.clone(),
                    queue_tx.clone(),
                    state_tx,
                    resync_rx,
                    receipt_rx,
                    cancel.clone(),
                );
                tokio::spawn(connection.run());
                tracing::info!(channel = %channel_id, "channel opened");

                vacant.insert(ChannelEntry {
                    refcount: 1,
                    cancel,
                    state_rx,
                    queue_tx,
                    receipt_tx,
                });
                Ok(Acquired::Opened {
                    queue_rx,
                    resync_tx,
                })
            }
        }
    }

    /// Drop one subscriber slot; tears the channel down on 1→0
    pub(crate) fn release(&self, channel_id: &str) {
        let mut closed = false;
        if let Some(mut entry) = self.channels.get_mut(channel_id) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entry.cancel.cancel();
                closed = true;
            } else {
                tracing::debug!(channel = %channel_id, refcount = entry.refcount, "left channel");
            }
        }
        if closed {
            self.channels.remove(channel_id);
            tracing::info!(channel = %channel_id, "channel closed");
        }
    }

    /// Ordered queue and receipt senders for a live channel
    pub(crate) fn senders(
        &self,
        channel_id: &str,
    ) -> Option<(
        mpsc::UnboundedSender<ChannelMessage>,
        mpsc::UnboundedSender<String>,
    )> {
        self.channels
            .get(channel_id)
            .map(|entry| (entry.queue_tx.clone(), entry.receipt_tx.clone()))
    }

    /// Observe a channel's connection state
    ///
    /// For a channel with no subscribers the receiver reports
    /// `Disconnected` and never changes.
    pub(crate) fn connection_state(&self, channel_id: &str) -> watch::Receiver<ChannelState> {
        if let Some(entry) = self.channels.get(channel_id) {
            entry.state_rx.clone()
        } else {
            let (_tx, rx) = watch::channel(ChannelState::Disconnected);
            rx
        }
    }

    pub(crate) fn active_channels(&self) -> usize {
        self.channels.len()
    }
}
