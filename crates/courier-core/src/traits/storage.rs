// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter traits for the dispatch core's persistence backend.
//!
//! Every operation that mutates state shared between workers is a single
//! atomic step on the backing store: a conditional update whose affected-row
//! count decides the outcome, an insert-on-conflict, or one transaction.
//! Callers pass `now` explicitly so that time is decided in one place.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CourierError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    ChannelDeliveryCount, Chip, ChipFilter, ClaimedJob, ConnectionStatus, DeadLetter,
    DeliveryQuery, DeliveryRecord, Job, QueueStats, QuotaCounter, QuotaReservation,
};

/// Adapter for storage and persistence backends.
///
/// Storage adapters manage the lifecycle of database connections.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), CourierError>;

    /// Closes the storage backend, flushing pending writes and releasing connections.
    async fn close(&self) -> Result<(), CourierError>;
}

/// The atomic operations the dispatch core needs from its store.
#[async_trait]
pub trait DispatchStore: StorageAdapter {
    // --- Job queue ---

    /// Persists a job that becomes claimable at `visible_at`.
    async fn enqueue_job(
        &self,
        job: &Job,
        visible_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CourierError>;

    /// Persists a job and admits its idempotency key in one transaction.
    ///
    /// Returns `false` without enqueueing when the key is still live. If the
    /// insert fails the key is not recorded, so the caller may retry. Jobs
    /// without a key always enqueue.
    async fn enqueue_job_once(
        &self,
        job: &Job,
        visible_at: DateTime<Utc>,
        max_attempts: u32,
        key_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    /// Claims the oldest due job, including jobs whose previous claim lapsed.
    ///
    /// The claim increments the attempt counter, issues a fresh claim token,
    /// and hides the job for `visibility`. Quota still held by a lapsed
    /// claim is returned to its tenant before the job is handed out again.
    async fn claim_job(
        &self,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<ClaimedJob>, CourierError>;

    /// Pushes a held claim's expiry out to `visible_until`.
    /// Returns `false` if the claim token is stale.
    async fn extend_claim(
        &self,
        job_id: &str,
        claim_token: &str,
        visible_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    /// Deletes a claimed job. Returns `false` if the claim token is stale.
    async fn remove_claimed_job(&self, job_id: &str, claim_token: &str)
    -> Result<bool, CourierError>;

    /// Releases a claimed job back to the queue, visible again at `visible_at`.
    async fn retry_job(
        &self,
        job_id: &str,
        claim_token: &str,
        visible_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    /// Moves a claimed job into the dead letter queue with its payload intact.
    /// Returns the dead letter id, or `None` if the claim token is stale.
    async fn dead_letter_job(
        &self,
        job_id: &str,
        claim_token: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourierError>;

    /// Removes a pending job that is not yet due. Claimed or due jobs stay.
    async fn cancel_job(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool, CourierError>;

    /// Lists dead letters, newest first.
    async fn list_dead_letters(
        &self,
        tenant_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetter>, CourierError>;

    /// Puts a dead-lettered payload back on the queue with a fresh attempt
    /// counter. Returns the job id, or `None` if no such dead letter exists.
    async fn requeue_dead_letter(
        &self,
        dead_letter_id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourierError>;

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats, CourierError>;

    // --- Quota ---

    /// Compare-and-increment of the tenant's period counter.
    ///
    /// Rolls the period over first when `now` has passed the reset time.
    /// Unknown tenants are denied.
    async fn reserve_quota(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<bool, CourierError>;

    /// Decrements the tenant's counter, never below zero.
    async fn release_quota(&self, tenant_id: &str) -> Result<bool, CourierError>;

    /// Reserves quota for the job held under `claim_token` and marks the job
    /// as holding it, in one transaction. Nothing is taken if the claim is
    /// stale.
    async fn reserve_quota_for_claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<QuotaReservation, CourierError>;

    /// Returns the unit held by the job under `claim_token`, if it still holds
    /// one. A lapsed claim's unit is returned by the next claim instead.
    async fn release_quota_for_claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        claim_token: &str,
    ) -> Result<bool, CourierError>;

    /// Provisions or adjusts a tenant's limit, clamping the counter to it.
    async fn set_quota_limit(
        &self,
        tenant_id: &str,
        limit: i64,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<QuotaCounter, CourierError>;

    async fn get_quota(&self, tenant_id: &str) -> Result<Option<QuotaCounter>, CourierError>;

    // --- Windows ---

    /// Takes one slot in `key`'s sliding window if fewer than `ceiling` slots
    /// were taken during the last `window`.
    ///
    /// Returns `None` when admitted, or how long until the oldest slot in the
    /// window expires.
    async fn try_acquire_rate_slot(
        &self,
        key: &str,
        ceiling: u32,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<Duration>, CourierError>;

    /// Set-if-absent-or-expired for a tenant-scoped idempotency key.
    async fn admit_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, CourierError>;

    /// Drops expired idempotency keys and rate window slots.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CourierError>;

    // --- Chips ---

    /// Inserts a chip, or reactivates and renames an existing one.
    async fn upsert_chip(
        &self,
        channel_id: &str,
        destination_identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Chip, CourierError>;

    async fn set_chip_status(
        &self,
        channel_id: &str,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    async fn set_chip_active(
        &self,
        channel_id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    /// Increments the chip's success or failure counter.
    async fn record_chip_outcome(
        &self,
        channel_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    async fn get_chip(&self, channel_id: &str) -> Result<Option<Chip>, CourierError>;

    async fn list_chips(&self, filter: &ChipFilter) -> Result<Vec<Chip>, CourierError>;

    /// Picks the chip `destination` is stuck to, if it is connected, active,
    /// and among `candidates`, stamping its `last_used_at`.
    async fn select_sticky_chip(
        &self,
        destination: &str,
        candidates: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Chip>, CourierError>;

    /// Picks the best connected, active chip among `candidates` by reputation
    /// then least recent use, stamping its `last_used_at`.
    async fn select_ranked_chip(
        &self,
        candidates: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Chip>, CourierError>;

    /// Creates the sticky mapping for `destination` if absent. Existing
    /// mappings are never rewritten. Returns whether a mapping was created.
    async fn map_sticky(
        &self,
        destination: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    async fn sticky_channel(&self, destination: &str) -> Result<Option<String>, CourierError>;

    // --- Delivery records ---

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), CourierError>;

    async fn query_deliveries(
        &self,
        query: &DeliveryQuery,
    ) -> Result<Vec<DeliveryRecord>, CourierError>;

    async fn delivery_counts_by_channel(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ChannelDeliveryCount>, CourierError>;
}
