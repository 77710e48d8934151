// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chip registry: persistent channel state plus the live client handles
//! owned by this process.
//!
//! Rows in the store describe every chip ever provisioned (they are only
//! ever deactivated). [`ClientHandles`] maps a channel id to the session
//! object that can actually send; selection considers only channels present
//! in that map. Session callbacks arrive as [`ClientEvent`]s and are fed
//! through [`ChipRegistry::apply_event`].

use std::sync::Arc;

use chrono::Utc;
use courier_core::{
    Chip, ChipFilter, ClientEvent, ConnectionStatus, CourierError, DispatchStore, OutboundClient,
};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{DispatchEvent, EventBus};

/// In-process map of channel id to live outbound client.
#[derive(Default)]
pub struct ClientHandles {
    inner: DashMap<String, Arc<dyn OutboundClient>>,
}

impl ClientHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn OutboundClient>> {
        self.inner.get(channel_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Register a handle, returning the one it replaced.
    pub fn set(
        &self,
        channel_id: impl Into<String>,
        client: Arc<dyn OutboundClient>,
    ) -> Option<Arc<dyn OutboundClient>> {
        self.inner.insert(channel_id.into(), client)
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<dyn OutboundClient>> {
        self.inner.remove(channel_id).map(|(_, client)| client)
    }

    /// Channel ids with a live handle, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub struct ChipRegistry {
    store: Arc<dyn DispatchStore>,
    handles: Arc<ClientHandles>,
    events: EventBus,
}

impl ChipRegistry {
    pub fn new(store: Arc<dyn DispatchStore>, handles: Arc<ClientHandles>, events: EventBus) -> Self {
        Self {
            store,
            handles,
            events,
        }
    }

    pub fn handles(&self) -> &Arc<ClientHandles> {
        &self.handles
    }

    /// Store (or reactivate) the chip row and register its live client.
    pub async fn provision(
        &self,
        channel_id: &str,
        destination_identity: &str,
        client: Arc<dyn OutboundClient>,
    ) -> Result<Chip, CourierError> {
        let chip = self
            .store
            .upsert_chip(channel_id, destination_identity, Utc::now())
            .await?;
        if let Some(previous) = self.handles.set(channel_id, client) {
            debug!(channel_id, "replacing existing client handle");
            if let Err(e) = previous.shutdown().await {
                warn!(channel_id, error = %e, "previous client shutdown failed");
            }
        }
        info!(channel_id, status = %chip.status, "chip provisioned");
        Ok(chip)
    }

    /// Drop the live handle and mark the row inactive. The row is kept.
    pub async fn deactivate(&self, channel_id: &str) -> Result<bool, CourierError> {
        if let Some(client) = self.handles.remove(channel_id) {
            if let Err(e) = client.shutdown().await {
                warn!(channel_id, error = %e, "client shutdown failed during deactivation");
            }
        }
        let updated = self
            .store
            .set_chip_active(channel_id, false, Utc::now())
            .await?;
        if updated {
            info!(channel_id, "chip deactivated");
        }
        Ok(updated)
    }

    /// Move a chip to `status`.
    ///
    /// Returns `true` when the status actually changed; only real
    /// transitions are published as events.
    pub async fn upsert_status(
        &self,
        channel_id: &str,
        status: ConnectionStatus,
    ) -> Result<bool, CourierError> {
        let Some(chip) = self.store.get_chip(channel_id).await? else {
            warn!(channel_id, %status, "status update for unknown chip");
            return Ok(false);
        };
        if chip.status == status {
            return Ok(false);
        }
        if !self
            .store
            .set_chip_status(channel_id, status, Utc::now())
            .await?
        {
            return Ok(false);
        }
        info!(channel_id, from = %chip.status, to = %status, "chip status changed");
        self.events.publish(DispatchEvent::StatusChanged {
            channel_id: channel_id.to_string(),
            status,
        });
        Ok(true)
    }

    pub async fn record_outcome(&self, channel_id: &str, success: bool) -> Result<(), CourierError> {
        if !self
            .store
            .record_chip_outcome(channel_id, success, Utc::now())
            .await?
        {
            warn!(channel_id, success, "outcome recorded for unknown chip");
        }
        Ok(())
    }

    pub async fn list(&self, filter: &ChipFilter) -> Result<Vec<Chip>, CourierError> {
        self.store.list_chips(filter).await
    }

    pub async fn get(&self, channel_id: &str) -> Result<Option<Chip>, CourierError> {
        self.store.get_chip(channel_id).await
    }

    /// State transition for a session callback.
    ///
    /// A QR challenge means the session lost its pairing, so the chip goes
    /// `disconnected` until the operator scans it and a status change arrives.
    pub async fn apply_event(&self, event: ClientEvent) -> Result<(), CourierError> {
        match event {
            ClientEvent::QrChallenge {
                channel_id,
                payload,
            } => {
                info!(channel_id = %channel_id, "pairing challenge received");
                self.upsert_status(&channel_id, ConnectionStatus::Disconnected)
                    .await?;
                self.events.publish(DispatchEvent::QrChallenge {
                    channel_id,
                    payload,
                });
            }
            ClientEvent::StatusChange { channel_id, status } => {
                self.upsert_status(&channel_id, status).await?;
            }
        }
        Ok(())
    }

    /// Drain client events into [`ChipRegistry::apply_event`] until the
    /// sender side closes or `cancel` fires.
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ClientEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        if let Err(e) = self.apply_event(event).await {
                            warn!(error = %e, "failed to apply client event");
                        }
                    }
                }
            }
            debug!("client event loop stopped");
        })
    }
}
