// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic channel probing and housekeeping.
//!
//! Each tick probes every live client handle and moves its chip to the
//! matching status, purges expired rate-limit slots and idempotency keys,
//! and refreshes queue depth gauges.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_core::{ConnectionStatus, CourierError, DispatchStore, HealthStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;
use crate::registry::ChipRegistry;
use crate::telemetry;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of probing the live handles once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub connected: usize,
    pub disconnected: usize,
    pub errored: usize,
    /// Chips whose stored status changed on this tick.
    pub transitions: usize,
}

pub struct HealthMonitor {
    registry: Arc<ChipRegistry>,
    queue: Arc<JobQueue>,
    store: Arc<dyn DispatchStore>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ChipRegistry>,
        queue: Arc<JobQueue>,
        store: Arc<dyn DispatchStore>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            store,
            interval,
        }
    }

    /// Probe every live handle once.
    pub async fn probe_all(&self) -> Result<ProbeReport, CourierError> {
        let mut report = ProbeReport::default();
        let handles = self.registry.handles();
        for channel_id in handles.ids() {
            let Some(client) = handles.get(&channel_id) else {
                continue;
            };
            let status = match tokio::time::timeout(PROBE_TIMEOUT, client.health_check()).await {
                Ok(Ok(HealthStatus::Healthy)) | Ok(Ok(HealthStatus::Degraded(_))) => {
                    ConnectionStatus::Connected
                }
                Ok(Ok(HealthStatus::Unhealthy(reason))) => {
                    debug!(channel_id = %channel_id, reason = %reason, "channel unhealthy");
                    ConnectionStatus::Disconnected
                }
                Ok(Err(e)) => {
                    warn!(channel_id = %channel_id, error = %e, "health probe failed");
                    ConnectionStatus::Error
                }
                Err(_) => {
                    warn!(channel_id = %channel_id, "health probe timed out");
                    ConnectionStatus::Error
                }
            };
            match status {
                ConnectionStatus::Connected => report.connected += 1,
                ConnectionStatus::Disconnected => report.disconnected += 1,
                ConnectionStatus::Error => report.errored += 1,
            }
            if self.registry.upsert_status(&channel_id, status).await? {
                report.transitions += 1;
            }
        }
        telemetry::channels_connected(report.connected);
        Ok(report)
    }

    /// One full tick: probes, expiry purge, and queue gauges.
    pub async fn tick(&self) -> Result<ProbeReport, CourierError> {
        let report = self.probe_all().await?;
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            debug!(purged, "expired rate slots and idempotency keys purged");
        }
        let stats = self.queue.stats().await?;
        telemetry::queue_depth(&stats);
        debug!(
            connected = report.connected,
            disconnected = report.disconnected,
            errored = report.errored,
            pending = stats.pending,
            in_flight = stats.in_flight,
            dead = stats.dead,
            "health tick"
        );
        Ok(report)
    }

    /// Tick immediately and then every interval until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "health monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(error = %e, "health tick failed");
                        }
                    }
                }
            }
            debug!("health monitor stopped");
        })
    }
}
