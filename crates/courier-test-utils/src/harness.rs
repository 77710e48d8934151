// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end dispatch testing.
//!
//! `TestHarness` assembles a full [`Dispatcher`] over a temp SQLite database,
//! provisions mock chips, and marks them connected. Timings are shortened so
//! retry and rate-limit paths run in milliseconds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_config::CourierConfig;
use courier_config::model::StorageConfig;
use courier_core::{
    ConnectionStatus, CourierError, DeliveryQuery, DeliveryRecord, DispatchStore, QuotaCounter,
};
use courier_dispatch::{AttemptOutcome, Dispatcher, SendRequest, SubmitOutcome};
use courier_storage::SqliteStore;

use crate::mock_client::MockOutboundClient;

struct ChipSpec {
    id: String,
    identity: String,
    client: Arc<MockOutboundClient>,
    connected: bool,
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: CourierConfig,
    chips: Vec<ChipSpec>,
    quotas: Vec<(String, i64)>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = CourierConfig::default();
        config.queue.backoff_base_ms = 10;
        config.queue.backoff_max_secs = 1;
        config.queue.poll_interval_ms = 10;
        config.rate_limit.min_wait_ms = 10;
        config.dispatch.send_timeout_secs = 5;
        Self {
            config,
            chips: Vec::new(),
            quotas: Vec::new(),
        }
    }

    /// Adjust the configuration before the dispatcher is built.
    pub fn configure(mut self, f: impl FnOnce(&mut CourierConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Provision a connected chip backed by `client`.
    pub fn with_chip(self, id: &str, client: Arc<MockOutboundClient>) -> Self {
        self.with_chip_status(id, client, true)
    }

    /// Provision a chip that starts disconnected.
    pub fn with_disconnected_chip(self, id: &str, client: Arc<MockOutboundClient>) -> Self {
        self.with_chip_status(id, client, false)
    }

    fn with_chip_status(mut self, id: &str, client: Arc<MockOutboundClient>, connected: bool) -> Self {
        self.chips.push(ChipSpec {
            id: id.to_string(),
            identity: format!("identity-{id}"),
            client,
            connected,
        });
        self
    }

    /// Provision a tenant quota (`-1` for unlimited).
    pub fn with_quota(mut self, tenant_id: &str, limit: i64) -> Self {
        self.quotas.push((tenant_id.to_string(), limit));
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, CourierError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| CourierError::Storage { source: e.into() })?;
        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: temp_dir.path().join("test.db").to_string_lossy().to_string(),
            wal_mode: true,
        };

        let store = SqliteStore::open(config.storage.clone()).await?;
        let store: Arc<dyn DispatchStore> = Arc::new(store);
        let dispatcher = Dispatcher::from_config(Arc::clone(&store), &config);

        for chip in self.chips {
            dispatcher
                .registry()
                .provision(&chip.id, &chip.identity, chip.client)
                .await?;
            if chip.connected {
                dispatcher
                    .registry()
                    .upsert_status(&chip.id, ConnectionStatus::Connected)
                    .await?;
            }
        }
        for (tenant_id, limit) in self.quotas {
            dispatcher.quota().set_limit(&tenant_id, limit).await?;
        }

        Ok(TestHarness {
            dispatcher,
            store,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete dispatch environment for integration tests.
pub struct TestHarness {
    pub dispatcher: Dispatcher,
    pub store: Arc<dyn DispatchStore>,
    pub config: CourierConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Path of the harness database, for opening a second store handle.
    pub fn database_path(&self) -> &str {
        &self.config.storage.database_path
    }

    pub async fn submit(&self, request: &SendRequest) -> Result<SubmitOutcome, CourierError> {
        self.dispatcher.producer().submit(request).await
    }

    /// Submit a plain text send and return its job id.
    pub async fn submit_text(
        &self,
        tenant_id: &str,
        destination: &str,
        body: &str,
    ) -> Result<String, CourierError> {
        match self.submit(&SendRequest::text(tenant_id, destination, body)).await? {
            SubmitOutcome::Accepted(handle) => Ok(handle.job_id),
            SubmitOutcome::Duplicate => Err(CourierError::Internal(
                "unexpected duplicate submission".into(),
            )),
        }
    }

    /// Claim the next due job and run one attempt on it.
    pub async fn process_next(&self) -> Result<Option<AttemptOutcome>, CourierError> {
        let Some(claimed) = self.dispatcher.queue().claim().await? else {
            return Ok(None);
        };
        self.dispatcher.worker(0).process(claimed).await.map(Some)
    }

    /// Process attempts until no job is pending, scheduled, or in flight,
    /// or until `timeout` elapses. Returns every outcome in order.
    pub async fn run_until_idle(
        &self,
        timeout: Duration,
    ) -> Result<Vec<AttemptOutcome>, CourierError> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = Vec::new();
        while Instant::now() < deadline {
            if let Some(outcome) = self.process_next().await? {
                outcomes.push(outcome);
                continue;
            }
            let stats = self.dispatcher.queue().stats().await?;
            if stats.pending + stats.scheduled + stats.in_flight == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(outcomes)
    }

    pub async fn history(&self, tenant_id: &str) -> Result<Vec<DeliveryRecord>, CourierError> {
        self.dispatcher
            .history(&DeliveryQuery::for_tenant(tenant_id))
            .await
    }

    pub async fn quota(&self, tenant_id: &str) -> Result<Option<QuotaCounter>, CourierError> {
        self.dispatcher.quota().get(tenant_id).await
    }
}
