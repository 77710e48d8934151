// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel selection for a destination.
//!
//! 1. The destination's sticky channel, if it is connected and live here.
//! 2. Otherwise the live connected channel with the best reputation
//!    (success minus failure), least recently used first on ties.
//! 3. Otherwise nothing.
//!
//! Each pick stamps `last_used_at` in the same store statement that chose
//! it, so concurrent selections spread across equally ranked channels.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use courier_core::{Chip, CourierError, DispatchStore, OutboundClient};
use tracing::{debug, warn};

use crate::registry::ClientHandles;

/// The channel chosen for one attempt, captured once and used for the
/// remainder of that attempt.
#[derive(Clone)]
pub struct Selection {
    pub channel_id: String,
    pub chip: Chip,
    pub client: Arc<dyn OutboundClient>,
    /// Chosen through the destination's sticky mapping.
    pub sticky: bool,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("channel_id", &self.channel_id)
            .field("sticky", &self.sticky)
            .field("reputation", &self.chip.reputation())
            .finish_non_exhaustive()
    }
}

pub struct ChannelSelector {
    store: Arc<dyn DispatchStore>,
    handles: Arc<ClientHandles>,
}

impl ChannelSelector {
    pub fn new(store: Arc<dyn DispatchStore>, handles: Arc<ClientHandles>) -> Self {
        Self { store, handles }
    }

    /// Pick a channel for `destination`, or `None` when nothing is connected.
    pub async fn select(&self, destination: &str) -> Result<Option<Selection>, CourierError> {
        let candidates = self.handles.ids();
        if candidates.is_empty() {
            return Ok(None);
        }
        let now = Utc::now();

        if let Some(chip) = self
            .store
            .select_sticky_chip(destination, &candidates, now)
            .await?
        {
            match self.handles.get(&chip.channel_id) {
                Some(client) => {
                    debug!(channel_id = %chip.channel_id, "sticky channel selected");
                    return Ok(Some(Selection {
                        channel_id: chip.channel_id.clone(),
                        chip,
                        client,
                        sticky: true,
                    }));
                }
                None => warn!(channel_id = %chip.channel_id, "sticky channel lost its handle"),
            }
        }

        let Some(chip) = self.store.select_ranked_chip(&candidates, now).await? else {
            return Ok(None);
        };
        let Some(client) = self.handles.get(&chip.channel_id) else {
            warn!(channel_id = %chip.channel_id, "ranked channel lost its handle");
            return Ok(None);
        };
        debug!(
            channel_id = %chip.channel_id,
            reputation = chip.reputation(),
            "ranked channel selected"
        );
        Ok(Some(Selection {
            channel_id: chip.channel_id.clone(),
            chip,
            client,
            sticky: false,
        }))
    }

    /// Persist the destination → channel mapping if none exists yet.
    pub async fn remember(&self, destination: &str, channel_id: &str) -> Result<bool, CourierError> {
        let created = self
            .store
            .map_sticky(destination, channel_id, Utc::now())
            .await?;
        if created {
            debug!(channel_id, "sticky mapping created");
        }
        Ok(created)
    }

    pub async fn sticky_channel(&self, destination: &str) -> Result<Option<String>, CourierError> {
        self.store.sticky_channel(destination).await
    }
}
