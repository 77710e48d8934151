// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant quota counters.
//!
//! Every write is a single conditional statement (or one immediate
//! transaction) so concurrent reservations from any number of workers and
//! processes never push `sent_this_period` past `message_limit`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{CourierError, QuotaCounter, QuotaReservation};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use crate::convert::{duration_ms, from_ms, to_ms};
use crate::database::{Database, map_tr_err};

/// Compare-and-increment, rolling the period over first if it has lapsed.
pub async fn reserve(
    db: &Database,
    tenant_id: &str,
    now: DateTime<Utc>,
    period: Duration,
) -> Result<bool, CourierError> {
    let tenant_id = tenant_id.to_string();
    let now = to_ms(now);
    let period = duration_ms(period).max(1);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = 0,
                     period_reset_at = period_reset_at
                         + ((?2 - period_reset_at) / ?3 + 1) * ?3
                 WHERE tenant_id = ?1 AND period_reset_at <= ?2",
                params![tenant_id, now, period],
            )?;
            let reserved = tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = sent_this_period + 1
                 WHERE tenant_id = ?1
                   AND (message_limit = -1 OR sent_this_period < message_limit)",
                params![tenant_id],
            )?;
            tx.commit()?;
            Ok(reserved == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Reserve for the job held under `claim_token` and flag the job as holding
/// the unit, so a lapsed claim can return it.
pub async fn reserve_for_claim(
    db: &Database,
    tenant_id: &str,
    job_id: &str,
    claim_token: &str,
    now: DateTime<Utc>,
    period: Duration,
) -> Result<QuotaReservation, CourierError> {
    let tenant_id = tenant_id.to_string();
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    let now = to_ms(now);
    let period = duration_ms(period).max(1);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let flagged = tx.execute(
                "UPDATE jobs SET quota_reserved = 1
                 WHERE job_id = ?1 AND claim_token = ?2 AND status = 'processing'
                   AND quota_reserved = 0",
                params![job_id, claim_token],
            )?;
            if flagged == 0 {
                return Ok(QuotaReservation::ClaimLost);
            }
            tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = 0,
                     period_reset_at = period_reset_at
                         + ((?2 - period_reset_at) / ?3 + 1) * ?3
                 WHERE tenant_id = ?1 AND period_reset_at <= ?2",
                params![tenant_id, now, period],
            )?;
            let reserved = tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = sent_this_period + 1
                 WHERE tenant_id = ?1
                   AND (message_limit = -1 OR sent_this_period < message_limit)",
                params![tenant_id],
            )?;
            if reserved == 0 {
                return Ok(QuotaReservation::Denied);
            }
            tx.commit()?;
            Ok(QuotaReservation::Reserved)
        })
        .await
        .map_err(map_tr_err)
}

/// Return the unit held by the job under `claim_token`. Does nothing when the
/// claim no longer holds one.
pub async fn release_for_claim(
    db: &Database,
    tenant_id: &str,
    job_id: &str,
    claim_token: &str,
) -> Result<bool, CourierError> {
    let tenant_id = tenant_id.to_string();
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let held = tx.execute(
                "UPDATE jobs SET quota_reserved = 0
                 WHERE job_id = ?1 AND claim_token = ?2 AND quota_reserved = 1",
                params![job_id, claim_token],
            )?;
            if held == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = sent_this_period - 1
                 WHERE tenant_id = ?1 AND sent_this_period > 0",
                params![tenant_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Give one reservation back. Never goes below zero.
pub async fn release(db: &Database, tenant_id: &str) -> Result<bool, CourierError> {
    let tenant_id = tenant_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = sent_this_period - 1
                 WHERE tenant_id = ?1 AND sent_this_period > 0",
                params![tenant_id],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Provision or change a tenant's limit. The current count is clamped down
/// to a lowered finite limit.
pub async fn set_limit(
    db: &Database,
    tenant_id: &str,
    limit: i64,
    now: DateTime<Utc>,
    period: Duration,
) -> Result<QuotaCounter, CourierError> {
    if limit < QuotaCounter::UNLIMITED {
        return Err(CourierError::Validation(format!(
            "quota limit must be -1 (unlimited) or non-negative, got {limit}"
        )));
    }
    let tenant_id = tenant_id.to_string();
    let reset_at = to_ms(now).saturating_add(duration_ms(period));
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "INSERT INTO tenant_quotas (tenant_id, sent_this_period, message_limit, period_reset_at)
                 VALUES (?1, 0, ?2, ?3)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                     message_limit = excluded.message_limit,
                     sent_this_period = CASE
                         WHEN excluded.message_limit >= 0
                              AND sent_this_period > excluded.message_limit
                         THEN excluded.message_limit
                         ELSE sent_this_period
                     END
                 RETURNING tenant_id, sent_this_period, message_limit, period_reset_at",
                params![tenant_id, limit, reset_at],
                map_counter,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, tenant_id: &str) -> Result<Option<QuotaCounter>, CourierError> {
    let tenant_id = tenant_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT tenant_id, sent_this_period, message_limit, period_reset_at
                 FROM tenant_quotas WHERE tenant_id = ?1",
                params![tenant_id],
                map_counter,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

fn map_counter(row: &rusqlite::Row<'_>) -> Result<QuotaCounter, rusqlite::Error> {
    Ok(QuotaCounter {
        tenant_id: row.get(0)?,
        sent_this_period: row.get(1)?,
        limit: row.get(2)?,
        period_reset_at: from_ms(row.get(3)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::tempdir;

    use crate::queries::jobs;

    const PERIOD: Duration = Duration::from_secs(30 * 86_400);

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn unknown_tenant_is_denied() {
        let (db, _dir) = setup_db().await;
        assert!(!reserve(&db, "ghost", Utc::now(), PERIOD).await.unwrap());
        assert!(get(&db, "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserve_stops_at_limit() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 2, now, PERIOD).await.unwrap();

        assert!(reserve(&db, "t", now, PERIOD).await.unwrap());
        assert!(reserve(&db, "t", now, PERIOD).await.unwrap());
        assert!(!reserve(&db, "t", now, PERIOD).await.unwrap());
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 2);
    }

    #[tokio::test]
    async fn unlimited_always_reserves_and_counts() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", -1, now, PERIOD).await.unwrap();
        for _ in 0..10 {
            assert!(reserve(&db, "t", now, PERIOD).await.unwrap());
        }
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 10);
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 5, now, PERIOD).await.unwrap();
        assert!(reserve(&db, "t", now, PERIOD).await.unwrap());
        assert!(release(&db, "t").await.unwrap());
        assert!(!release(&db, "t").await.unwrap());
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 0);
    }

    #[tokio::test]
    async fn lapsed_period_rolls_over() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        let counter = set_limit(&db, "t", 1, now, PERIOD).await.unwrap();
        assert!(reserve(&db, "t", now, PERIOD).await.unwrap());
        assert!(!reserve(&db, "t", now, PERIOD).await.unwrap());

        // Two and a half periods later the counter resets and the reset time
        // lands in the future again.
        let later = now + TimeDelta::days(75);
        assert!(reserve(&db, "t", later, PERIOD).await.unwrap());
        let after = get(&db, "t").await.unwrap().unwrap();
        assert_eq!(after.sent_this_period, 1);
        assert!(after.period_reset_at > later);
        assert_eq!(
            after.period_reset_at,
            counter.period_reset_at + TimeDelta::days(60)
        );
    }

    #[tokio::test]
    async fn lowering_limit_clamps_count() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 10, now, PERIOD).await.unwrap();
        for _ in 0..6 {
            reserve(&db, "t", now, PERIOD).await.unwrap();
        }
        let counter = set_limit(&db, "t", 4, now, PERIOD).await.unwrap();
        assert_eq!(counter.sent_this_period, 4);
        assert_eq!(counter.limit, 4);

        let raised = set_limit(&db, "t", -1, now, PERIOD).await.unwrap();
        assert_eq!(raised.sent_this_period, 4);
    }

    #[tokio::test]
    async fn invalid_limit_is_rejected() {
        let (db, _dir) = setup_db().await;
        let err = set_limit(&db, "t", -2, Utc::now(), PERIOD)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    fn claimable(id: &str, tenant: &str) -> courier_core::Job {
        courier_core::Job {
            job_id: id.to_string(),
            tenant_id: tenant.to_string(),
            destination: "5511999990000".to_string(),
            body_text: Some("hello".to_string()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 0,
        }
    }

    const VIS: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn claim_scoped_reservation_is_released_once() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 5, now, PERIOD).await.unwrap();
        jobs::enqueue(&db, &claimable("j1", "t"), now, 5, now).await.unwrap();
        let held = jobs::claim(&db, now, VIS).await.unwrap().unwrap();

        let taken = reserve_for_claim(&db, "t", "j1", &held.claim_token, now, PERIOD)
            .await
            .unwrap();
        assert_eq!(taken, QuotaReservation::Reserved);
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 1);

        assert!(release_for_claim(&db, "t", "j1", &held.claim_token).await.unwrap());
        assert!(!release_for_claim(&db, "t", "j1", &held.claim_token).await.unwrap());
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 0);
    }

    #[tokio::test]
    async fn lapsed_claim_gives_its_quota_back_on_reclaim() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 5, now, PERIOD).await.unwrap();
        reserve(&db, "t", now, PERIOD).await.unwrap();
        jobs::enqueue(&db, &claimable("j1", "t"), now, 5, now).await.unwrap();

        let first = jobs::claim(&db, now, VIS).await.unwrap().unwrap();
        reserve_for_claim(&db, "t", "j1", &first.claim_token, now, PERIOD)
            .await
            .unwrap();
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 2);

        // The worker vanished; the next claim returns its unit.
        let later = now + chrono::TimeDelta::seconds(31);
        let second = jobs::claim(&db, later, VIS).await.unwrap().unwrap();
        assert_eq!(second.job.job_id, "j1");
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 1);

        // The stale worker cannot release it a second time.
        assert!(!release_for_claim(&db, "t", "j1", &first.claim_token).await.unwrap());
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 1);
        let stale = reserve_for_claim(&db, "t", "j1", &first.claim_token, later, PERIOD)
            .await
            .unwrap();
        assert_eq!(stale, QuotaReservation::ClaimLost);
    }

    #[tokio::test]
    async fn denied_claim_reservation_leaves_job_unflagged() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        set_limit(&db, "t", 0, now, PERIOD).await.unwrap();
        jobs::enqueue(&db, &claimable("j1", "t"), now, 5, now).await.unwrap();
        let held = jobs::claim(&db, now, VIS).await.unwrap().unwrap();

        let denied = reserve_for_claim(&db, "t", "j1", &held.claim_token, now, PERIOD)
            .await
            .unwrap();
        assert_eq!(denied, QuotaReservation::Denied);
        assert!(!release_for_claim(&db, "t", "j1", &held.claim_token).await.unwrap());
        assert_eq!(get(&db, "t").await.unwrap().unwrap().sent_this_period, 0);
    }
}
