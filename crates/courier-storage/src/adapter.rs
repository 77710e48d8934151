// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the `StorageAdapter` and `DispatchStore` traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use courier_config::model::StorageConfig;
use courier_core::{
    AdapterType, ChannelDeliveryCount, Chip, ChipFilter, ClaimedJob, ConnectionStatus,
    CourierError, DeadLetter, DeliveryQuery, DeliveryRecord, DispatchStore, HealthStatus, Job,
    PluginAdapter, QueueStats, QuotaCounter, QuotaReservation, StorageAdapter,
};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed dispatch store.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily opened on the first call to
/// [`StorageAdapter::initialize`].
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given configuration.
    ///
    /// The database connection is not opened until [`StorageAdapter::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Construct and initialize in one step.
    pub async fn open(config: StorageConfig) -> Result<Self, CourierError> {
        let store = Self::new(config);
        store.initialize().await?;
        Ok(store)
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, CourierError> {
        self.db.get().ok_or_else(|| CourierError::Storage {
            source: "storage not initialized; call initialize() first".into(),
        })
    }

    async fn checkpoint(&self) -> Result<(), CourierError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CourierError> {
        self.checkpoint().await
    }
}

#[async_trait]
impl StorageAdapter for SqliteStore {
    async fn initialize(&self) -> Result<(), CourierError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| CourierError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), CourierError> {
        self.db()?;
        self.checkpoint().await
    }
}

#[async_trait]
impl DispatchStore for SqliteStore {
    // --- Job queue ---

    async fn enqueue_job(
        &self,
        job: &Job,
        visible_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CourierError> {
        queries::jobs::enqueue(self.db()?, job, visible_at, max_attempts, now).await
    }

    async fn enqueue_job_once(
        &self,
        job: &Job,
        visible_at: DateTime<Utc>,
        max_attempts: u32,
        key_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::jobs::enqueue_once(self.db()?, job, visible_at, max_attempts, key_ttl, now).await
    }

    async fn claim_job(
        &self,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<ClaimedJob>, CourierError> {
        queries::jobs::claim(self.db()?, now, visibility).await
    }

    async fn extend_claim(
        &self,
        job_id: &str,
        claim_token: &str,
        visible_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::jobs::extend(self.db()?, job_id, claim_token, visible_until, now).await
    }

    async fn remove_claimed_job(
        &self,
        job_id: &str,
        claim_token: &str,
    ) -> Result<bool, CourierError> {
        queries::jobs::remove_claimed(self.db()?, job_id, claim_token).await
    }

    async fn retry_job(
        &self,
        job_id: &str,
        claim_token: &str,
        visible_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::jobs::retry(self.db()?, job_id, claim_token, visible_at, error, now).await
    }

    async fn dead_letter_job(
        &self,
        job_id: &str,
        claim_token: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourierError> {
        queries::jobs::dead_letter(self.db()?, job_id, claim_token, reason, now).await
    }

    async fn cancel_job(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool, CourierError> {
        queries::jobs::cancel(self.db()?, job_id, now).await
    }

    async fn list_dead_letters(
        &self,
        tenant_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetter>, CourierError> {
        queries::dead_letters::list(self.db()?, tenant_id, limit).await
    }

    async fn requeue_dead_letter(
        &self,
        dead_letter_id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourierError> {
        queries::dead_letters::requeue(self.db()?, dead_letter_id, max_attempts, now).await
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats, CourierError> {
        queries::jobs::stats(self.db()?, now).await
    }

    // --- Quota ---

    async fn reserve_quota(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<bool, CourierError> {
        queries::quotas::reserve(self.db()?, tenant_id, now, period).await
    }

    async fn release_quota(&self, tenant_id: &str) -> Result<bool, CourierError> {
        queries::quotas::release(self.db()?, tenant_id).await
    }

    async fn reserve_quota_for_claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<QuotaReservation, CourierError> {
        queries::quotas::reserve_for_claim(self.db()?, tenant_id, job_id, claim_token, now, period)
            .await
    }

    async fn release_quota_for_claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        claim_token: &str,
    ) -> Result<bool, CourierError> {
        queries::quotas::release_for_claim(self.db()?, tenant_id, job_id, claim_token).await
    }

    async fn set_quota_limit(
        &self,
        tenant_id: &str,
        limit: i64,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<QuotaCounter, CourierError> {
        queries::quotas::set_limit(self.db()?, tenant_id, limit, now, period).await
    }

    async fn get_quota(&self, tenant_id: &str) -> Result<Option<QuotaCounter>, CourierError> {
        queries::quotas::get(self.db()?, tenant_id).await
    }

    // --- Windows ---

    async fn try_acquire_rate_slot(
        &self,
        key: &str,
        ceiling: u32,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<Duration>, CourierError> {
        queries::windows::try_acquire_slot(self.db()?, key, ceiling, now, window).await
    }

    async fn admit_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, CourierError> {
        queries::windows::admit_key(self.db()?, tenant_id, key, now, ttl).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CourierError> {
        queries::windows::purge_expired(self.db()?, now).await
    }

    // --- Chips ---

    async fn upsert_chip(
        &self,
        channel_id: &str,
        destination_identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Chip, CourierError> {
        queries::chips::upsert(self.db()?, channel_id, destination_identity, now).await
    }

    async fn set_chip_status(
        &self,
        channel_id: &str,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::chips::set_status(self.db()?, channel_id, status, now).await
    }

    async fn set_chip_active(
        &self,
        channel_id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::chips::set_active(self.db()?, channel_id, active, now).await
    }

    async fn record_chip_outcome(
        &self,
        channel_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::chips::record_outcome(self.db()?, channel_id, success, now).await
    }

    async fn get_chip(&self, channel_id: &str) -> Result<Option<Chip>, CourierError> {
        queries::chips::get(self.db()?, channel_id).await
    }

    async fn list_chips(&self, filter: &ChipFilter) -> Result<Vec<Chip>, CourierError> {
        queries::chips::list(self.db()?, filter).await
    }

    async fn select_sticky_chip(
        &self,
        destination: &str,
        candidates: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Chip>, CourierError> {
        queries::chips::select_sticky(self.db()?, destination, candidates, now).await
    }

    async fn select_ranked_chip(
        &self,
        candidates: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Chip>, CourierError> {
        queries::chips::select_ranked(self.db()?, candidates, now).await
    }

    async fn map_sticky(
        &self,
        destination: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        queries::chips::map_sticky(self.db()?, destination, channel_id, now).await
    }

    async fn sticky_channel(&self, destination: &str) -> Result<Option<String>, CourierError> {
        queries::chips::sticky_channel(self.db()?, destination).await
    }

    // --- Delivery records ---

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), CourierError> {
        queries::deliveries::insert(self.db()?, record).await
    }

    async fn query_deliveries(
        &self,
        query: &DeliveryQuery,
    ) -> Result<Vec<DeliveryRecord>, CourierError> {
        queries::deliveries::query(self.db()?, query).await
    }

    async fn delivery_counts_by_channel(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ChannelDeliveryCount>, CourierError> {
        queries::deliveries::counts_by_channel(self.db()?, tenant_id).await
    }
}
