//! Stream connection - one per active channel
//!
//! State machine:
//!
//! ```text
//! Idle → Connecting → Open → (Closing | Backoff) → Idle
//!              ▲                        │
//!              └────── delay ───────────┘
//! ```
//!
//! On transport failure the connection enters `Backoff` with a capped
//! exponential delay plus jitter; the attempt counter resets on any
//! successful open. While `Connecting`/`Backoff`, no normalized events
//! are emitted. Re-entering `Open` always requests a resynchronization
//! snapshot before live events flow - stream continuity is never
//! assumed. Raw transport errors stop here: consumers only ever observe
//! the published [`ChannelState`].

use crate::config::SyncConfig;
use crate::normalizer;
use crate::transport::{Transport, TransportConn};
use shared::channel::ChannelState;
use shared::error::SyncError;
use shared::event::NormalizedEvent;
use shared::sync::SnapshotRequest;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Messages placed on a channel's ordered reconcile queue
#[derive(Debug)]
pub(crate) enum ChannelMessage {
    /// One live normalized event
    Event(NormalizedEvent),
    /// A resync snapshot, applied atomically by the reconcile task
    Snapshot {
        channel: String,
        epoch: String,
        events: Vec<NormalizedEvent>,
        server_sequence: u64,
    },
    /// Locally-originated read mark, routed through the queue so its
    /// effect lands in reconciled order
    LocalRead { notification_id: String },
}

pub(crate) struct StreamConnection {
    channel: String,
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    queue_tx: mpsc::UnboundedSender<ChannelMessage>,
    state_tx: watch::Sender<ChannelState>,
    resync_rx: mpsc::UnboundedReceiver<Vec<String>>,
    receipt_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl StreamConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: String,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        queue_tx: mpsc::UnboundedSender<ChannelMessage>,
        state_tx: watch::Sender<ChannelState>,
        resync_rx: mpsc::UnboundedReceiver<Vec<String>>,
        receipt_rx: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            config,
            transport,
            queue_tx,
            state_tx,
            resync_rx,
            receipt_rx,
            cancel,
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }

    /// Drive the connection until the channel is torn down
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ChannelState::Connecting);

            let connect = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(std::slice::from_ref(&self.channel)) => result,
            };

            match connect {
                Ok(conn) => match self.request_snapshot(conn.as_ref(), Vec::new()).await {
                    Ok(()) => {
                        attempt = 0;
                        self.set_state(ChannelState::Connected);
                        tracing::info!(channel = %self.channel, "channel open");
                        let flow = self.serve(conn.as_ref()).await;
                        conn.close().await;
                        if flow.is_break() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %self.channel, error = %e, "snapshot on connect failed");
                        conn.close().await;
                    }
                },
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "connect failed");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            let limit = self.config.max_reconnect_attempts;
            if limit != 0 && attempt >= limit {
                tracing::error!(
                    channel = %self.channel,
                    attempts = attempt,
                    "reconnect attempts exhausted"
                );
                self.set_state(ChannelState::Disconnected);
                self.cancel.cancelled().await;
                break;
            }

            let delay = self.config.backoff_delay(attempt);
            attempt += 1;
            self.set_state(ChannelState::Backoff);
            tracing::debug!(
                channel = %self.channel,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before reconnect"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ChannelState::Disconnected);
        tracing::debug!(channel = %self.channel, "connection task stopped");
    }

    /// Pump one open connection; `Break` means teardown, `Continue`
    /// means transport failure and a reconnect is due
    async fn serve(&mut self, conn: &dyn TransportConn) -> ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return ControlFlow::Break(()),

                Some(entity_ids) = self.resync_rx.recv() => {
                    if let Err(e) = self.request_snapshot(conn, entity_ids).await {
                        tracing::warn!(channel = %self.channel, error = %e, "targeted resync failed");
                        return ControlFlow::Continue(());
                    }
                }

                Some(notification_id) = self.receipt_rx.recv() => {
                    // fire-and-forget: a lost receipt is re-discovered
                    // through the next snapshot
                    if let Err(e) = conn.send_read_receipt(&notification_id).await {
                        tracing::debug!(error = %e, "read receipt dropped");
                    }
                }

                event = conn.next_event() => match event {
                    Ok(raw) => match normalizer::normalize(&raw) {
                        Ok(normalized) => {
                            let _ = self.queue_tx.send(ChannelMessage::Event(normalized));
                        }
                        Err(e) => {
                            tracing::warn!(
                                channel = %raw.channel,
                                sequence = raw.sequence,
                                error = %e,
                                "malformed event dropped"
                            );
                        }
                    },
                    Err(e) => {
                        tracing::warn!(channel = %self.channel, error = %e, "stream failed, reconnecting");
                        return ControlFlow::Continue(());
                    }
                },
            }
        }
    }

    /// Request a full (or targeted) snapshot and enqueue it
    async fn request_snapshot(
        &self,
        conn: &dyn TransportConn,
        entity_ids: Vec<String>,
    ) -> Result<(), SyncError> {
        let request = if entity_ids.is_empty() {
            SnapshotRequest::full(self.channel.clone())
        } else {
            tracing::info!(channel = %self.channel, entities = entity_ids.len(), "targeted resync");
            SnapshotRequest::targeted(self.channel.clone(), entity_ids)
        };

        let response = tokio::time::timeout(self.config.request_timeout, conn.request_snapshot(request))
            .await
            .map_err(|_| SyncError::Transport("snapshot request timed out".to_string()))??;

        let events = normalizer::snapshot_events(&response);
        let _ = self.queue_tx.send(ChannelMessage::Snapshot {
            channel: self.channel.clone(),
            epoch: response.server_epoch,
            events,
            server_sequence: response.server_sequence,
        });
        Ok(())
    }
}
