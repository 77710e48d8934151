// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job queue operations.
//!
//! A job row is `pending` until claimed and `processing` while a worker holds
//! it. `visible_at` doubles as the claim expiry: a `processing` row whose
//! `visible_at` has passed is claimable again under a new token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{ClaimedJob, CourierError, Job, QueueStats};
use rusqlite::{TransactionBehavior, params};
use rusqlite::types::Type;

use crate::convert::{duration_ms, from_ms, to_ms};
use crate::database::{Database, map_tr_err};
use crate::queries::windows::ADMIT_KEY;

/// Insert a job, claimable from `visible_at`.
pub async fn enqueue(
    db: &Database,
    job: &Job,
    visible_at: DateTime<Utc>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<(), CourierError> {
    let row = JobRow::new(job, visible_at, max_attempts, now)?;
    db.connection()
        .call(move |conn| row.insert(conn))
        .await
        .map_err(map_tr_err)
}

/// Admit the job's idempotency key and insert the job in one transaction.
///
/// Returns `false` when the key is still live. A failed insert rolls the
/// key back with it.
pub async fn enqueue_once(
    db: &Database,
    job: &Job,
    visible_at: DateTime<Utc>,
    max_attempts: u32,
    key_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let row = JobRow::new(job, visible_at, max_attempts, now)?;
    let key = job.idempotency_key.clone();
    let now_ms = to_ms(now);
    let key_expires_at = now_ms.saturating_add(duration_ms(key_ttl));
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(key) = key {
                let admitted = tx.execute(
                    ADMIT_KEY,
                    params![row.tenant_id, key, now_ms, key_expires_at],
                )?;
                if admitted == 0 {
                    return Ok(false);
                }
            }
            row.insert(&tx)?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// A job serialized for the `jobs` table.
struct JobRow {
    job_id: String,
    tenant_id: String,
    payload: String,
    max_attempts: u32,
    visible_at: i64,
    now: i64,
}

impl JobRow {
    fn new(
        job: &Job,
        visible_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, CourierError> {
        Ok(Self {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            payload: serde_json::to_string(job).map_err(CourierError::storage)?,
            max_attempts,
            visible_at: to_ms(visible_at),
            now: to_ms(now),
        })
    }

    fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO jobs (job_id, tenant_id, payload, max_attempts, visible_at,
                               created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                self.job_id,
                self.tenant_id,
                self.payload,
                self.max_attempts,
                self.visible_at,
                self.now
            ],
        )?;
        Ok(())
    }
}

/// Claim the oldest due job.
///
/// Runs in one transaction that first returns quota still held by lapsed
/// claims, then parks lapsed claims which already used their final attempt
/// in the dead letter queue, so a job that keeps killing its worker still
/// terminates.
pub async fn claim(
    db: &Database,
    now: DateTime<Utc>,
    visibility: Duration,
) -> Result<Option<ClaimedJob>, CourierError> {
    let token = uuid::Uuid::new_v4().to_string();
    let now_ms = to_ms(now);
    let until_ms = now_ms.saturating_add(duration_ms(visibility));
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "UPDATE tenant_quotas
                 SET sent_this_period = MAX(0, sent_this_period - (
                     SELECT COUNT(*) FROM jobs
                     WHERE jobs.tenant_id = tenant_quotas.tenant_id
                       AND jobs.quota_reserved = 1 AND jobs.visible_at <= ?1))
                 WHERE tenant_id IN (
                     SELECT tenant_id FROM jobs WHERE quota_reserved = 1 AND visible_at <= ?1)",
                params![now_ms],
            )?;
            tx.execute(
                "UPDATE jobs SET quota_reserved = 0 WHERE quota_reserved = 1 AND visible_at <= ?1",
                params![now_ms],
            )?;

            tx.execute(
                "INSERT INTO dead_letters (id, job_id, tenant_id, payload, reason, attempts, created_at)
                 SELECT lower(hex(randomblob(16))), job_id, tenant_id, payload,
                        'claim expired on final attempt', attempt, ?1
                 FROM jobs
                 WHERE status = 'processing' AND visible_at <= ?1 AND attempt >= max_attempts",
                params![now_ms],
            )?;
            tx.execute(
                "DELETE FROM jobs
                 WHERE status = 'processing' AND visible_at <= ?1 AND attempt >= max_attempts",
                params![now_ms],
            )?;

            let claimed = {
                let mut stmt = tx.prepare(
                    "UPDATE jobs
                     SET status = 'processing', attempt = attempt + 1, claim_token = ?1,
                         visible_at = ?2, updated_at = ?3
                     WHERE seq = (SELECT seq FROM jobs WHERE visible_at <= ?3
                                  ORDER BY visible_at, seq LIMIT 1)
                     RETURNING payload, attempt, max_attempts",
                )?;
                let mut rows = stmt.query(params![token, until_ms, now_ms])?;
                match rows.next()? {
                    Some(row) => {
                        let payload: String = row.get(0)?;
                        let attempt: u32 = row.get(1)?;
                        let max_attempts: u32 = row.get(2)?;
                        let mut job: Job = serde_json::from_str(&payload).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                        })?;
                        job.attempt = attempt;
                        Some(ClaimedJob {
                            job,
                            claim_token: token,
                            max_attempts,
                            visible_until: from_ms(until_ms),
                        })
                    }
                    None => None,
                }
            };

            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Move a held claim's expiry to `visible_until`.
pub async fn extend(
    db: &Database,
    job_id: &str,
    claim_token: &str,
    visible_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    let visible_until = to_ms(visible_until);
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE jobs SET visible_at = ?1, updated_at = ?2
                 WHERE job_id = ?3 AND claim_token = ?4 AND status = 'processing'",
                params![visible_until, now, job_id, claim_token],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a job held under `claim_token`.
pub async fn remove_claimed(
    db: &Database,
    job_id: &str,
    claim_token: &str,
) -> Result<bool, CourierError> {
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM jobs
                 WHERE job_id = ?1 AND claim_token = ?2 AND status = 'processing'",
                params![job_id, claim_token],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Return a claimed job to `pending`, hidden until `visible_at`.
pub async fn retry(
    db: &Database,
    job_id: &str,
    claim_token: &str,
    visible_at: DateTime<Utc>,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    let error = error.to_string();
    let visible_at = to_ms(visible_at);
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE jobs
                 SET status = 'pending', claim_token = NULL, visible_at = ?1,
                     last_error = ?2, updated_at = ?3
                 WHERE job_id = ?4 AND claim_token = ?5 AND status = 'processing'",
                params![visible_at, error, now, job_id, claim_token],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Move a claimed job into `dead_letters`, payload copied verbatim.
pub async fn dead_letter(
    db: &Database,
    job_id: &str,
    claim_token: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, CourierError> {
    let id = uuid::Uuid::new_v4().to_string();
    let job_id = job_id.to_string();
    let claim_token = claim_token.to_string();
    let reason = reason.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let moved = tx.execute(
                "INSERT INTO dead_letters (id, job_id, tenant_id, payload, reason, attempts, created_at)
                 SELECT ?1, job_id, tenant_id, payload, ?2, attempt, ?3
                 FROM jobs
                 WHERE job_id = ?4 AND claim_token = ?5 AND status = 'processing'",
                params![id, reason, now, job_id, claim_token],
            )?;
            if moved == 0 {
                return Ok(None);
            }
            tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
            tx.commit()?;
            Ok(Some(id))
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a pending job whose visibility time is still in the future.
pub async fn cancel(db: &Database, job_id: &str, now: DateTime<Utc>) -> Result<bool, CourierError> {
    let job_id = job_id.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM jobs WHERE job_id = ?1 AND status = 'pending' AND visible_at > ?2",
                params![job_id, now],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Count jobs by queue state.
pub async fn stats(db: &Database, now: DateTime<Utc>) -> Result<QueueStats, CourierError> {
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let (pending, scheduled, in_flight): (i64, i64, i64) = conn.query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN visible_at <= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'pending' AND visible_at > ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'processing' AND visible_at > ?1 THEN 1 ELSE 0 END), 0)
                 FROM jobs",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let dead: i64 =
                conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
            Ok(QueueStats {
                pending: pending.max(0) as u64,
                scheduled: scheduled.max(0) as u64,
                in_flight: in_flight.max(0) as u64,
                dead: dead.max(0) as u64,
            })
        })
        .await
        .map_err(map_tr_err)
}
