// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only delivery records and tenant history queries.

use courier_core::{ChannelDeliveryCount, CourierError, DeliveryQuery, DeliveryRecord};
use rusqlite::params;

use crate::convert::{from_ms, parse_column, to_ms};
use crate::database::{Database, map_tr_err};

pub async fn insert(db: &Database, record: &DeliveryRecord) -> Result<(), CourierError> {
    let r = record.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO deliveries (id, job_id, tenant_id, destination, status, channel_used,
                                         error_detail, attempt, provider_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    r.id,
                    r.job_id,
                    r.tenant_id,
                    r.destination,
                    r.status.to_string(),
                    r.channel_used,
                    r.error_detail,
                    r.attempt,
                    r.provider_message_id,
                    to_ms(r.created_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Tenant history, newest first.
pub async fn query(
    db: &Database,
    query: &DeliveryQuery,
) -> Result<Vec<DeliveryRecord>, CourierError> {
    let tenant_id = query.tenant_id.clone();
    let status = query.status.map(|s| s.to_string());
    let destination = query.destination.clone();
    let since = query.since.map(to_ms);
    let until = query.until.map(to_ms);
    let limit = query.limit;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job_id, tenant_id, destination, status, channel_used, error_detail,
                        attempt, provider_message_id, created_at
                 FROM deliveries
                 WHERE tenant_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR destination = ?3)
                   AND (?4 IS NULL OR created_at >= ?4)
                   AND (?5 IS NULL OR created_at <= ?5)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?6",
            )?;
            let rows = stmt.query_map(
                params![tenant_id, status, destination, since, until, limit],
                |row| {
                    let status: String = row.get(4)?;
                    Ok(DeliveryRecord {
                        id: row.get(0)?,
                        job_id: row.get(1)?,
                        tenant_id: row.get(2)?,
                        destination: row.get(3)?,
                        status: parse_column(4, &status)?,
                        channel_used: row.get(5)?,
                        error_detail: row.get(6)?,
                        attempt: row.get(7)?,
                        provider_message_id: row.get(8)?,
                        created_at: from_ms(row.get(9)?),
                    })
                },
            )?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Sent and failed totals per channel for one tenant.
pub async fn counts_by_channel(
    db: &Database,
    tenant_id: &str,
) -> Result<Vec<ChannelDeliveryCount>, CourierError> {
    let tenant_id = tenant_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_used,
                        SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
                 FROM deliveries
                 WHERE tenant_id = ?1
                 GROUP BY channel_used
                 ORDER BY channel_used",
            )?;
            let rows = stmt.query_map(params![tenant_id], |row| {
                let sent: i64 = row.get(1)?;
                let failed: i64 = row.get(2)?;
                Ok(ChannelDeliveryCount {
                    channel_used: row.get(0)?,
                    sent: sent.max(0) as u64,
                    failed: failed.max(0) as u64,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::chips;
    use chrono::{DateTime, TimeDelta, Utc};
    use courier_core::DeliveryStatus;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        chips::upsert(&db, "chip-a", "5511000000001", Utc::now())
            .await
            .unwrap();
        (db, dir)
    }

    fn record(
        id: &str,
        tenant: &str,
        destination: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> DeliveryRecord {
        DeliveryRecord {
            id: id.to_string(),
            job_id: format!("job-{id}"),
            tenant_id: tenant.to_string(),
            destination: destination.to_string(),
            status,
            channel_used: (status == DeliveryStatus::Sent).then(|| "chip-a".to_string()),
            error_detail: (status == DeliveryStatus::Failed).then(|| "quota_exceeded".to_string()),
            attempt: 1,
            provider_message_id: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn history_filters_and_orders() {
        let (db, _dir) = setup_db().await;
        let t0 = Utc::now();
        insert(&db, &record("1", "t", "111", DeliveryStatus::Sent, t0)).await.unwrap();
        insert(&db, &record("2", "t", "222", DeliveryStatus::Failed, t0 + TimeDelta::seconds(1)))
            .await
            .unwrap();
        insert(&db, &record("3", "t", "111", DeliveryStatus::Sent, t0 + TimeDelta::seconds(2)))
            .await
            .unwrap();
        insert(&db, &record("4", "other", "111", DeliveryStatus::Sent, t0)).await.unwrap();

        let all = query(&db, &DeliveryQuery::for_tenant("t")).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["3", "2", "1"]
        );

        let mut q = DeliveryQuery::for_tenant("t");
        q.status = Some(DeliveryStatus::Sent);
        q.destination = Some("111".to_string());
        q.since = Some(t0 + TimeDelta::seconds(1));
        let filtered = query(&db, &q).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "3");

        let mut q = DeliveryQuery::for_tenant("t");
        q.limit = 1;
        assert_eq!(query(&db, &q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_are_immutable() {
        let (db, _dir) = setup_db().await;
        insert(&db, &record("1", "t", "111", DeliveryStatus::Sent, Utc::now()))
            .await
            .unwrap();
        let result = db
            .connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute("UPDATE deliveries SET status = 'failed'", [])
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn counts_group_by_channel() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        insert(&db, &record("1", "t", "111", DeliveryStatus::Sent, now)).await.unwrap();
        insert(&db, &record("2", "t", "111", DeliveryStatus::Sent, now)).await.unwrap();
        insert(&db, &record("3", "t", "111", DeliveryStatus::Failed, now)).await.unwrap();

        let counts = counts_by_channel(&db, "t").await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].channel_used, None);
        assert_eq!(counts[0].failed, 1);
        assert_eq!(counts[1].channel_used.as_deref(), Some("chip-a"));
        assert_eq!(counts[1].sent, 2);
    }
}
