// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chip rows, reputation counters, and sticky destination mappings.
//!
//! Selection picks and stamps a chip in one `UPDATE ... RETURNING`, so two
//! concurrent selections see each other's `last_used_at`.

use chrono::{DateTime, Utc};
use courier_core::{Chip, ChipFilter, ConnectionStatus, CourierError};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};

use crate::convert::{from_ms, parse_column, to_ms};
use crate::database::{Database, map_tr_err};

const CHIP_COLUMNS: &str = "channel_id, destination_identity, status, active, last_used_at,
     success_count, failure_count, created_at, updated_at";

fn map_chip(row: &rusqlite::Row<'_>) -> Result<Chip, rusqlite::Error> {
    let status: String = row.get(2)?;
    let last_used_at: Option<i64> = row.get(4)?;
    Ok(Chip {
        channel_id: row.get(0)?,
        destination_identity: row.get(1)?,
        status: parse_column(2, &status)?,
        active: row.get(3)?,
        last_used_at: last_used_at.map(from_ms),
        success_count: row.get(5)?,
        failure_count: row.get(6)?,
        created_at: from_ms(row.get(7)?),
        updated_at: from_ms(row.get(8)?),
    })
}

/// `?start, ?start+1, ...` for an `IN (...)` list.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert a chip or reactivate an existing one under a (possibly new) identity.
pub async fn upsert(
    db: &Database,
    channel_id: &str,
    destination_identity: &str,
    now: DateTime<Utc>,
) -> Result<Chip, CourierError> {
    let channel_id = channel_id.to_string();
    let identity = destination_identity.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO chips (channel_id, destination_identity, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(channel_id) DO UPDATE SET
                         destination_identity = excluded.destination_identity,
                         active = 1,
                         updated_at = excluded.updated_at
                     RETURNING {CHIP_COLUMNS}"
                ),
                params![channel_id, identity, now],
                map_chip,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_status(
    db: &Database,
    channel_id: &str,
    status: ConnectionStatus,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let channel_id = channel_id.to_string();
    let status = status.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE chips SET status = ?1, updated_at = ?2 WHERE channel_id = ?3",
                params![status, now, channel_id],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_active(
    db: &Database,
    channel_id: &str,
    active: bool,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let channel_id = channel_id.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE chips SET active = ?1, updated_at = ?2 WHERE channel_id = ?3",
                params![active, now, channel_id],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Bump the success or failure counter.
pub async fn record_outcome(
    db: &Database,
    channel_id: &str,
    success: bool,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let channel_id = channel_id.to_string();
    let now = to_ms(now);
    let sql = if success {
        "UPDATE chips SET success_count = success_count + 1, updated_at = ?1 WHERE channel_id = ?2"
    } else {
        "UPDATE chips SET failure_count = failure_count + 1, updated_at = ?1 WHERE channel_id = ?2"
    };
    db.connection()
        .call(move |conn| {
            let n = conn.execute(sql, params![now, channel_id])?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, channel_id: &str) -> Result<Option<Chip>, CourierError> {
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CHIP_COLUMNS} FROM chips WHERE channel_id = ?1"),
                params![channel_id],
                map_chip,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list(db: &Database, filter: &ChipFilter) -> Result<Vec<Chip>, CourierError> {
    let status = filter.status.map(|s| s.to_string());
    let include_inactive = filter.include_inactive;
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHIP_COLUMNS} FROM chips
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 OR active = 1)
                 ORDER BY channel_id"
            ))?;
            let rows = stmt.query_map(params![status, include_inactive], map_chip)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// The chip `destination` is mapped to, if it is connected, active, and one
/// of `candidates`. Stamps `last_used_at` on the chip it returns.
pub async fn select_sticky(
    db: &Database,
    destination: &str,
    candidates: &[String],
    now: DateTime<Utc>,
) -> Result<Option<Chip>, CourierError> {
    if candidates.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "UPDATE chips SET last_used_at = ?1
         WHERE channel_id = (
             SELECT c.channel_id
             FROM sticky_mappings s JOIN chips c ON c.channel_id = s.channel_id
             WHERE s.destination = ?2 AND c.status = 'connected' AND c.active = 1
               AND c.channel_id IN ({}))
         RETURNING {CHIP_COLUMNS}",
        placeholders(3, candidates.len())
    );
    let mut values = vec![Value::Integer(to_ms(now)), Value::Text(destination.to_string())];
    values.extend(candidates.iter().cloned().map(Value::Text));
    select_one(db, sql, values).await
}

/// The best connected, active chip among `candidates`: highest reputation,
/// then least recently used. Stamps `last_used_at` on the chip it returns.
pub async fn select_ranked(
    db: &Database,
    candidates: &[String],
    now: DateTime<Utc>,
) -> Result<Option<Chip>, CourierError> {
    if candidates.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "UPDATE chips SET last_used_at = ?1
         WHERE channel_id = (
             SELECT channel_id FROM chips
             WHERE status = 'connected' AND active = 1 AND channel_id IN ({})
             ORDER BY (success_count - failure_count) DESC,
                      COALESCE(last_used_at, 0) ASC,
                      channel_id ASC
             LIMIT 1)
         RETURNING {CHIP_COLUMNS}",
        placeholders(2, candidates.len())
    );
    let mut values = vec![Value::Integer(to_ms(now))];
    values.extend(candidates.iter().cloned().map(Value::Text));
    select_one(db, sql, values).await
}

async fn select_one(
    db: &Database,
    sql: String,
    values: Vec<Value>,
) -> Result<Option<Chip>, CourierError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(&sql, params_from_iter(values.iter()), map_chip)
                .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Create the mapping if the destination has none. Never rewrites.
pub async fn map_sticky(
    db: &Database,
    destination: &str,
    channel_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, CourierError> {
    let destination = destination.to_string();
    let channel_id = channel_id.to_string();
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "INSERT INTO sticky_mappings (destination, channel_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(destination) DO NOTHING",
                params![destination, channel_id, now],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn sticky_channel(
    db: &Database,
    destination: &str,
) -> Result<Option<String>, CourierError> {
    let destination = destination.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT channel_id FROM sticky_mappings WHERE destination = ?1",
                params![destination],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    async fn connected_chip(db: &Database, id: &str, successes: u32, failures: u32) {
        let now = Utc::now();
        upsert(db, id, "5511000000000", now).await.unwrap();
        set_status(db, id, ConnectionStatus::Connected, now).await.unwrap();
        for _ in 0..successes {
            record_outcome(db, id, true, now).await.unwrap();
        }
        for _ in 0..failures {
            record_outcome(db, id, false, now).await.unwrap();
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(3, 2), "?3, ?4");
    }

    #[tokio::test]
    async fn upsert_starts_disconnected_and_reactivates() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        let chip = upsert(&db, "c1", "5511000000001", now).await.unwrap();
        assert_eq!(chip.status, ConnectionStatus::Disconnected);
        assert!(chip.active);

        set_active(&db, "c1", false, now).await.unwrap();
        assert!(list(&db, &ChipFilter::default()).await.unwrap().is_empty());
        let all = list(
            &db,
            &ChipFilter {
                include_inactive: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all.len(), 1);

        let chip = upsert(&db, "c1", "5511000000009", now).await.unwrap();
        assert!(chip.active);
        assert_eq!(chip.destination_identity, "5511000000009");
    }

    #[tokio::test]
    async fn ranked_prefers_reputation_then_least_recent() {
        let (db, _dir) = setup_db().await;
        connected_chip(&db, "good", 12, 2).await;
        connected_chip(&db, "bad", 0, 2).await;
        let candidates = ids(&["good", "bad"]);

        let now = Utc::now();
        let pick = select_ranked(&db, &candidates, now).await.unwrap().unwrap();
        assert_eq!(pick.channel_id, "good");
        assert_eq!(pick.reputation(), 10);
        assert!(pick.last_used_at.is_some());

        // Equal reputation: the one used longer ago wins.
        connected_chip(&db, "x", 0, 0).await;
        connected_chip(&db, "y", 0, 0).await;
        let pair = ids(&["x", "y"]);
        let first = select_ranked(&db, &pair, now).await.unwrap().unwrap();
        let second = select_ranked(&db, &pair, now + TimeDelta::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.channel_id, second.channel_id);
    }

    #[tokio::test]
    async fn ranked_skips_disconnected_inactive_and_non_candidates() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        connected_chip(&db, "off", 50, 0).await;
        set_status(&db, "off", ConnectionStatus::Disconnected, now).await.unwrap();
        connected_chip(&db, "retired", 50, 0).await;
        set_active(&db, "retired", false, now).await.unwrap();
        connected_chip(&db, "elsewhere", 50, 0).await;
        connected_chip(&db, "ok", 0, 0).await;

        let candidates = ids(&["off", "retired", "ok"]);
        let pick = select_ranked(&db, &candidates, now).await.unwrap().unwrap();
        assert_eq!(pick.channel_id, "ok");

        assert!(select_ranked(&db, &[], now).await.unwrap().is_none());
        assert!(
            select_ranked(&db, &ids(&["off"]), now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sticky_mapping_is_created_once() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        connected_chip(&db, "a", 0, 0).await;
        connected_chip(&db, "b", 0, 0).await;

        assert!(map_sticky(&db, "dest", "a", now).await.unwrap());
        assert!(!map_sticky(&db, "dest", "b", now).await.unwrap());
        assert_eq!(sticky_channel(&db, "dest").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn sticky_selection_requires_connected_candidate() {
        let (db, _dir) = setup_db().await;
        let now = Utc::now();
        connected_chip(&db, "a", 0, 0).await;
        map_sticky(&db, "dest", "a", now).await.unwrap();
        let candidates = ids(&["a"]);

        let pick = select_sticky(&db, "dest", &candidates, now).await.unwrap();
        assert_eq!(pick.unwrap().channel_id, "a");
        assert!(select_sticky(&db, "other", &candidates, now).await.unwrap().is_none());

        set_status(&db, "a", ConnectionStatus::Error, now).await.unwrap();
        assert!(select_sticky(&db, "dest", &candidates, now).await.unwrap().is_none());
    }
}
