// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring for the dispatch components around one shared store.

use std::sync::Arc;
use std::time::Duration;

use courier_config::CourierConfig;
use courier_config::model::DispatchConfig;
use courier_core::{
    ChannelDeliveryCount, CourierError, DeliveryQuery, DeliveryRecord, DispatchStore,
};

use crate::events::EventBus;
use crate::health::HealthMonitor;
use crate::idempotency::IdempotencyGuard;
use crate::pool::WorkerPool;
use crate::producer::Producer;
use crate::queue::JobQueue;
use crate::quota::QuotaReservoir;
use crate::rate_limit::RateLimiter;
use crate::registry::{ChipRegistry, ClientHandles};
use crate::selector::ChannelSelector;
use crate::worker::DispatchWorker;

/// Per-attempt knobs for workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub send_timeout: Duration,
    /// Send permanent failures straight to the dead letter queue instead of
    /// retrying them up to the attempt ceiling.
    pub dead_letter_permanent_errors: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            dead_letter_permanent_errors: false,
        }
    }
}

impl From<&DispatchConfig> for WorkerSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            dead_letter_permanent_errors: config.dead_letter_permanent_errors,
        }
    }
}

/// All dispatch components, cheap to clone and share between tasks.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) store: Arc<dyn DispatchStore>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) quota: Arc<QuotaReservoir>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) guard: Arc<IdempotencyGuard>,
    pub(crate) registry: Arc<ChipRegistry>,
    pub(crate) selector: Arc<ChannelSelector>,
    pub(crate) events: EventBus,
    pub(crate) settings: WorkerSettings,
}

impl Dispatcher {
    /// Build every component from configuration.
    pub fn from_config(store: Arc<dyn DispatchStore>, config: &CourierConfig) -> Self {
        let handles = Arc::new(ClientHandles::new());
        let events = EventBus::new(config.dispatch.event_buffer);
        Self {
            queue: Arc::new(JobQueue::from_config(Arc::clone(&store), &config.queue)),
            quota: Arc::new(QuotaReservoir::new(Arc::clone(&store), config.quota.period())),
            limiter: Arc::new(RateLimiter::from_config(Arc::clone(&store), &config.rate_limit)),
            guard: Arc::new(IdempotencyGuard::new(
                Arc::clone(&store),
                Duration::from_secs(config.idempotency.ttl_secs),
            )),
            registry: Arc::new(ChipRegistry::new(
                Arc::clone(&store),
                Arc::clone(&handles),
                events.clone(),
            )),
            selector: Arc::new(ChannelSelector::new(Arc::clone(&store), handles)),
            settings: WorkerSettings::from(&config.dispatch),
            events,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn DispatchStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn quota(&self) -> &Arc<QuotaReservoir> {
        &self.quota
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyGuard> {
        &self.guard
    }

    pub fn registry(&self) -> &Arc<ChipRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ChannelSelector> {
        &self.selector
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> WorkerSettings {
        self.settings
    }

    pub fn producer(&self) -> Producer {
        Producer::new(Arc::clone(&self.queue), Arc::clone(&self.guard))
    }

    pub fn worker(&self, id: usize) -> DispatchWorker {
        DispatchWorker::new(id, self.clone())
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.clone())
    }

    pub fn health_monitor(&self, interval: Duration) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            interval,
        )
    }

    /// A tenant's delivery history, newest first.
    pub async fn history(&self, query: &DeliveryQuery) -> Result<Vec<DeliveryRecord>, CourierError> {
        self.store.query_deliveries(query).await
    }

    pub async fn delivery_counts(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ChannelDeliveryCount>, CourierError> {
        self.store.delivery_counts_by_channel(tenant_id).await
    }
}
