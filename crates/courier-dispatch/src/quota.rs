// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tenant message allowance.
//!
//! Every check-and-increment runs as one atomic store call, so concurrent
//! workers (in this process or another one sharing the database) can never
//! push a tenant past its limit. Period rollover happens lazily inside that
//! same call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_core::{ClaimedJob, CourierError, DispatchStore, QuotaCounter, QuotaReservation};
use tracing::{debug, info, warn};

use crate::telemetry;

/// Reserves and releases sends against tenant quotas.
pub struct QuotaReservoir {
    store: Arc<dyn DispatchStore>,
    period: Duration,
}

impl QuotaReservoir {
    pub fn new(store: Arc<dyn DispatchStore>, period: Duration) -> Self {
        Self { store, period }
    }

    /// Take one unit of the tenant's allowance.
    ///
    /// Returns `false` when the tenant is at its limit or has no quota row.
    /// Unlimited tenants always succeed, and their counter still advances.
    pub async fn reserve(&self, tenant_id: &str) -> Result<bool, CourierError> {
        let reserved = self
            .store
            .reserve_quota(tenant_id, Utc::now(), self.period)
            .await?;
        if reserved {
            debug!(tenant_id, "quota reserved");
        } else {
            warn!(tenant_id, "quota exhausted, reservation denied");
            telemetry::quota_denied();
        }
        Ok(reserved)
    }

    /// Take one unit on behalf of a claimed job. The unit is tied to the
    /// claim, so it comes back if the claim lapses before it is released or
    /// the job finishes.
    pub async fn reserve_for(
        &self,
        claimed: &ClaimedJob,
    ) -> Result<QuotaReservation, CourierError> {
        let job = &claimed.job;
        let reservation = self
            .store
            .reserve_quota_for_claim(
                &job.tenant_id,
                &job.job_id,
                &claimed.claim_token,
                Utc::now(),
                self.period,
            )
            .await?;
        match reservation {
            QuotaReservation::Reserved => debug!(tenant_id = %job.tenant_id, "quota reserved"),
            QuotaReservation::Denied => {
                warn!(tenant_id = %job.tenant_id, "quota exhausted, reservation denied");
                telemetry::quota_denied();
            }
            QuotaReservation::ClaimLost => {
                warn!(job_id = %job.job_id, "claim lapsed before quota reservation");
            }
        }
        Ok(reservation)
    }

    /// Give back the unit a claimed job holds.
    pub async fn release_for(&self, claimed: &ClaimedJob) -> Result<bool, CourierError> {
        let job = &claimed.job;
        let released = self
            .store
            .release_quota_for_claim(&job.tenant_id, &job.job_id, &claimed.claim_token)
            .await?;
        debug!(tenant_id = %job.tenant_id, released, "quota released");
        Ok(released)
    }

    /// Give back one unit after a failed attempt. Never goes below zero.
    pub async fn release(&self, tenant_id: &str) -> Result<bool, CourierError> {
        let released = self.store.release_quota(tenant_id).await?;
        debug!(tenant_id, released, "quota released");
        Ok(released)
    }

    /// Provision a tenant or change its limit (`-1` for unlimited).
    pub async fn set_limit(&self, tenant_id: &str, limit: i64) -> Result<QuotaCounter, CourierError> {
        let counter = self
            .store
            .set_quota_limit(tenant_id, limit, Utc::now(), self.period)
            .await?;
        info!(
            tenant_id,
            limit = counter.limit,
            sent = counter.sent_this_period,
            "tenant quota updated"
        );
        Ok(counter)
    }

    pub async fn get(&self, tenant_id: &str) -> Result<Option<QuotaCounter>, CourierError> {
        self.store.get_quota(tenant_id).await
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::model::StorageConfig;
    use courier_storage::SqliteStore;

    const PERIOD: Duration = Duration::from_secs(30 * 86_400);

    async fn reservoir() -> (QuotaReservoir, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("quota.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::open(config).await.unwrap();
        (QuotaReservoir::new(Arc::new(store), PERIOD), dir)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn unknown_tenant_is_denied() {
        let (quota, _dir) = reservoir().await;
        assert!(!quota.reserve("nobody").await.unwrap());
        assert!(logs_contain("reservation denied"));
    }

    #[tokio::test]
    async fn reserve_stops_at_limit_and_release_frees_a_unit() {
        let (quota, _dir) = reservoir().await;
        quota.set_limit("acme", 2).await.unwrap();

        assert!(quota.reserve("acme").await.unwrap());
        assert!(quota.reserve("acme").await.unwrap());
        assert!(!quota.reserve("acme").await.unwrap());

        assert!(quota.release("acme").await.unwrap());
        assert!(quota.reserve("acme").await.unwrap());

        let counter = quota.get("acme").await.unwrap().unwrap();
        assert_eq!(counter.sent_this_period, 2);
        assert_eq!(counter.remaining(), Some(0));
    }

    #[tokio::test]
    async fn unlimited_tenant_always_reserves_and_counts() {
        let (quota, _dir) = reservoir().await;
        quota.set_limit("big", QuotaCounter::UNLIMITED).await.unwrap();
        for _ in 0..5 {
            assert!(quota.reserve("big").await.unwrap());
        }
        let counter = quota.get("big").await.unwrap().unwrap();
        assert_eq!(counter.sent_this_period, 5);
        assert_eq!(counter.remaining(), None);
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let (quota, _dir) = reservoir().await;
        quota.set_limit("acme", 3).await.unwrap();
        quota.release("acme").await.unwrap();
        let counter = quota.get("acme").await.unwrap().unwrap();
        assert_eq!(counter.sent_this_period, 0);
    }

    #[tokio::test]
    async fn claim_reservation_comes_back_after_lapse() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("quota.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store: Arc<dyn DispatchStore> = Arc::new(SqliteStore::open(config).await.unwrap());
        let quota = QuotaReservoir::new(store.clone(), PERIOD);
        quota.set_limit("acme", 1).await.unwrap();

        let now = Utc::now();
        let job = courier_core::Job {
            job_id: "j1".into(),
            tenant_id: "acme".into(),
            destination: "5511999990000".into(),
            body_text: Some("hi".into()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 0,
        };
        store.enqueue_job(&job, now, 5, now).await.unwrap();
        let visibility = Duration::from_millis(30);
        let first = store.claim_job(now, visibility).await.unwrap().unwrap();
        assert_eq!(quota.reserve_for(&first).await.unwrap(), QuotaReservation::Reserved);
        assert_eq!(quota.get("acme").await.unwrap().unwrap().remaining(), Some(0));

        let later = now + chrono::TimeDelta::milliseconds(31);
        let second = store.claim_job(later, visibility).await.unwrap().unwrap();
        assert_eq!(quota.get("acme").await.unwrap().unwrap().remaining(), Some(1));
        assert!(!quota.release_for(&first).await.unwrap());
        assert_eq!(quota.reserve_for(&second).await.unwrap(), QuotaReservation::Reserved);
        assert!(quota.release_for(&second).await.unwrap());
        assert_eq!(quota.get("acme").await.unwrap().unwrap().sent_this_period, 0);
    }
}
