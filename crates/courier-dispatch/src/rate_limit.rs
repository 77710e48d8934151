// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel send throttling.
//!
//! Slots live in the store as a sliding log keyed by channel, so the ceiling
//! holds across every worker and process sharing the database. A caller over
//! the ceiling sleeps until the oldest slot in its window expires (never less
//! than the configured minimum wait) and tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_config::model::RateLimitConfig;
use courier_core::{CourierError, DispatchStore};
use tracing::debug;

use crate::telemetry;

/// Result of a successful [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Admission {
    /// How many times the caller was turned away before admission.
    pub waits: u32,
    /// Total time spent sleeping.
    pub waited: Duration,
}

pub struct RateLimiter {
    store: Arc<dyn DispatchStore>,
    ceiling: u32,
    window: Duration,
    min_wait: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        ceiling: u32,
        window: Duration,
        min_wait: Duration,
    ) -> Self {
        Self {
            store,
            ceiling,
            window,
            min_wait,
        }
    }

    pub fn from_config(store: Arc<dyn DispatchStore>, config: &RateLimitConfig) -> Self {
        Self::new(
            store,
            config.ceiling_per_window,
            Duration::from_secs(config.window_secs),
            Duration::from_millis(config.min_wait_ms),
        )
    }

    /// The configured per-window ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Block until `channel_id` has room under `ceiling`, then take a slot.
    pub async fn acquire(&self, channel_id: &str, ceiling: u32) -> Result<Admission, CourierError> {
        let mut admission = Admission::default();
        while let Some(wait) = self.poll(channel_id, ceiling).await? {
            admission.waits += 1;
            admission.waited += wait;
            tokio::time::sleep(wait).await;
        }
        Ok(admission)
    }

    /// Take a slot under `ceiling` if one is free. When refused, returns how
    /// long to wait before asking again (never less than the minimum wait).
    /// Callers that must stay responsive while waiting poll with this
    /// instead of [`acquire`](Self::acquire).
    pub async fn poll(
        &self,
        channel_id: &str,
        ceiling: u32,
    ) -> Result<Option<Duration>, CourierError> {
        let verdict = self
            .store
            .try_acquire_rate_slot(&rate_key(channel_id), ceiling, Utc::now(), self.window)
            .await?;
        let Some(wait) = verdict else {
            return Ok(None);
        };
        let wait = wait.max(self.min_wait);
        debug!(
            channel_id,
            ceiling,
            wait_ms = wait.as_millis() as u64,
            "rate ceiling reached, waiting for window"
        );
        telemetry::rate_limit_wait(channel_id);
        Ok(Some(wait))
    }

    /// [`poll`](Self::poll) under the configured ceiling.
    pub async fn try_acquire(&self, channel_id: &str) -> Result<Option<Duration>, CourierError> {
        self.poll(channel_id, self.ceiling).await
    }
}

fn rate_key(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}
