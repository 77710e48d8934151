// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expiring records: rate limit slots and idempotency keys.
//!
//! Expiry is evaluated inside the same statement or transaction that takes a
//! slot or admits a key, so there is no separate read-then-reset race.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::CourierError;
use rusqlite::{TransactionBehavior, params};

use crate::convert::{duration_ms, to_ms};
use crate::database::{Database, map_tr_err};

/// Take a slot in `key`'s sliding window if fewer than `ceiling` slots are
/// live. Returns `None` when admitted, otherwise the time until the oldest
/// live slot expires.
pub async fn try_acquire_slot(
    db: &Database,
    key: &str,
    ceiling: u32,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Option<Duration>, CourierError> {
    let key = key.to_string();
    let now = to_ms(now);
    let expires_at = now.saturating_add(duration_ms(window));
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM rate_slots WHERE key = ?1 AND expires_at <= ?2",
                params![key, now],
            )?;
            let (live, oldest_expiry): (u32, Option<i64>) = tx.query_row(
                "SELECT COUNT(*), MIN(expires_at) FROM rate_slots WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let outcome = if live < ceiling {
                tx.execute(
                    "INSERT INTO rate_slots (key, taken_at, expires_at) VALUES (?1, ?2, ?3)",
                    params![key, now, expires_at],
                )?;
                None
            } else {
                let wait_ms = oldest_expiry.map_or(1, |at| (at - now).max(1));
                Some(Duration::from_millis(wait_ms as u64))
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Inserts `(tenant_id, key)` or refreshes it if expired. Touches no row
/// while the key is live.
pub(crate) const ADMIT_KEY: &str = "
    INSERT INTO idempotency_keys (tenant_id, key, created_at, expires_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(tenant_id, key) DO UPDATE SET
        created_at = excluded.created_at,
        expires_at = excluded.expires_at
    WHERE idempotency_keys.expires_at <= excluded.created_at";

/// Set-if-absent-or-expired for `(tenant_id, key)`.
pub async fn admit_key(
    db: &Database,
    tenant_id: &str,
    key: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<bool, CourierError> {
    let tenant_id = tenant_id.to_string();
    let key = key.to_string();
    let now = to_ms(now);
    let expires_at = now.saturating_add(duration_ms(ttl));
    db.connection()
        .call(move |conn| {
            let n = conn.execute(ADMIT_KEY, params![tenant_id, key, now, expires_at])?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete expired slots and keys. Returns the number of rows removed.
pub async fn purge_expired(db: &Database, now: DateTime<Utc>) -> Result<u64, CourierError> {
    let now = to_ms(now);
    db.connection()
        .call(move |conn| {
            let slots = conn.execute("DELETE FROM rate_slots WHERE expires_at <= ?1", params![now])?;
            let keys = conn.execute(
                "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
                params![now],
            )?;
            Ok((slots + keys) as u64)
        })
        .await
        .map_err(map_tr_err)
}
