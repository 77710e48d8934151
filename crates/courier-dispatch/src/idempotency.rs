// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tenant idempotency keys with a TTL.
//!
//! Submissions admit their key together with the job insert through
//! [`JobQueue::enqueue_once`](crate::queue::JobQueue::enqueue_once), using
//! this guard's TTL. [`IdempotencyGuard::admit_once`] is the standalone form.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_core::{CourierError, DispatchStore};
use tracing::debug;

pub struct IdempotencyGuard {
    store: Arc<dyn DispatchStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn DispatchStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Default TTL, applied by [`IdempotencyGuard::admit`] and by submissions.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Admit `key` for `tenant_id` unless it was admitted within `ttl`.
    ///
    /// Requests without a key are always admitted. Keys are scoped per
    /// tenant, so two tenants may use the same key independently.
    pub async fn admit_once(
        &self,
        tenant_id: &str,
        key: Option<&str>,
        ttl: Duration,
    ) -> Result<bool, CourierError> {
        let Some(key) = key else {
            return Ok(true);
        };
        let admitted = self
            .store
            .admit_idempotency_key(tenant_id, key, Utc::now(), ttl)
            .await?;
        if !admitted {
            debug!(tenant_id, key, "idempotency key already admitted");
        }
        Ok(admitted)
    }

    /// [`IdempotencyGuard::admit_once`] with the configured TTL.
    pub async fn admit(&self, tenant_id: &str, key: Option<&str>) -> Result<bool, CourierError> {
        self.admit_once(tenant_id, key, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::model::StorageConfig;
    use courier_storage::SqliteStore;

    async fn guard(ttl: Duration) -> (IdempotencyGuard, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("idem.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::open(config).await.unwrap();
        (IdempotencyGuard::new(Arc::new(store), ttl), dir)
    }

    #[tokio::test]
    async fn missing_key_always_admits() {
        let (guard, _dir) = guard(Duration::from_secs(3600)).await;
        assert!(guard.admit("t1", None).await.unwrap());
        assert!(guard.admit("t1", None).await.unwrap());
    }

    #[tokio::test]
    async fn repeated_key_is_rejected_within_ttl() {
        let (guard, _dir) = guard(Duration::from_secs(3600)).await;
        assert!(guard.admit("t1", Some("order-1")).await.unwrap());
        assert!(!guard.admit("t1", Some("order-1")).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_scoped_per_tenant() {
        let (guard, _dir) = guard(Duration::from_secs(3600)).await;
        assert!(guard.admit("t1", Some("k")).await.unwrap());
        assert!(guard.admit("t2", Some("k")).await.unwrap());
    }

    #[tokio::test]
    async fn key_is_admitted_again_after_ttl() {
        let (guard, _dir) = guard(Duration::from_millis(50)).await;
        assert!(guard.admit("t1", Some("k")).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(guard.admit("t1", Some("k")).await.unwrap());
    }
}
