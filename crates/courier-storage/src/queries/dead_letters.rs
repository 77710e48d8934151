// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dead letter queue inspection and replay.

use chrono::{DateTime, Utc};
use courier_core::{CourierError, DeadLetter};
use rusqlite::{TransactionBehavior, params};

use crate::convert::{from_ms, to_ms};
use crate::database::{Database, map_tr_err};

/// List dead letters newest first, optionally for one tenant.
pub async fn list(
    db: &Database,
    tenant_id: Option<&str>,
    limit: u32,
) -> Result<Vec<DeadLetter>, CourierError> {
    let tenant_id = tenant_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job_id, tenant_id, payload, reason, attempts, created_at
                 FROM dead_letters
                 WHERE ?1 IS NULL OR tenant_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![tenant_id, limit], |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    tenant_id: row.get(2)?,
                    payload: row.get(3)?,
                    reason: row.get(4)?,
                    attempts: row.get(5)?,
                    created_at: from_ms(row.get(6)?),
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Put a dead-lettered payload back on the queue, due immediately, with a
/// fresh attempt counter. The dead letter row is consumed.
pub async fn requeue(
    db: &Database,
    dead_letter_id: &str,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<Option<String>, CourierError> {
    let dead_letter_id = dead_letter_id.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let found = tx.query_row(
                "SELECT job_id, tenant_id, payload FROM dead_letters WHERE id = ?1",
                params![dead_letter_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            );
            let (job_id, tenant_id, payload) = match found {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e),
            };

            tx.execute(
                "INSERT INTO jobs (job_id, tenant_id, payload, max_attempts, visible_at,
                                   created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
                params![job_id, tenant_id, payload, max_attempts, now],
            )?;
            tx.execute(
                "DELETE FROM dead_letters WHERE id = ?1",
                params![dead_letter_id],
            )?;
            tx.commit()?;
            Ok(Some(job_id))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::jobs;
    use courier_core::Job;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    async fn bury(db: &Database, job_id: &str, tenant: &str, now: DateTime<Utc>) -> String {
        let job = Job {
            job_id: job_id.to_string(),
            tenant_id: tenant.to_string(),
            destination: "5511999990000".to_string(),
            body_text: Some("hi".to_string()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 0,
        };
        jobs::enqueue(db, &job, now, 1, now).await.unwrap();
        let claimed = jobs::claim(db, now, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        jobs::dead_letter(db, job_id, &claimed.claim_token, "send_transient", now)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn list_filters_by_tenant() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        bury(&db, "a1", "tenant-a", now).await;
        bury(&db, "b1", "tenant-b", now).await;

        assert_eq!(list(&db, None, 10).await.unwrap().len(), 2);
        let only_a = list(&db, Some("tenant-a"), 10).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].job_id, "a1");
        assert_eq!(only_a[0].job().unwrap().tenant_id, "tenant-a");
        assert_eq!(list(&db, None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_resets_attempts_and_consumes_letter() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        let id = bury(&db, "a1", "tenant-a", now).await;

        let job_id = requeue(&db, &id, 5, now).await.unwrap();
        assert_eq!(job_id.as_deref(), Some("a1"));
        assert!(list(&db, None, 10).await.unwrap().is_empty());
        assert!(requeue(&db, &id, 5, now).await.unwrap().is_none());

        let claimed = jobs::claim(&db, now, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job.attempt, 1);
        assert_eq!(claimed.max_attempts, 5);
        assert_eq!(claimed.job.body_text.as_deref(), Some("hi"));
    }
}
