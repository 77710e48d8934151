// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use courier_core::CourierError;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::migrations;

/// Handle to the dispatch database.
///
/// Cloning the inner connection is cheap; every clone talks to the same
/// background thread.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` in WAL mode and apply migrations.
    pub async fn open(path: &str) -> Result<Self, CourierError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing the journal mode explicitly.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, CourierError> {
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(CourierError::storage)?;
        }

        let conn = Connection::open(path).await.map_err(|e| map_tr_err(tokio_rusqlite::Error::Error(e)))?;

        let journal = if wal_mode { "WAL" } else { "DELETE" };
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {journal};
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;"
            ))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(flatten_call_err)?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The serialized connection used by every query module.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), CourierError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

/// Convert tokio-rusqlite errors into `CourierError::Storage`.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CourierError {
    match e {
        tokio_rusqlite::Error::Error(inner) => CourierError::storage(inner),
        other => CourierError::Storage {
            source: other.to_string().into(),
        },
    }
}

/// Unwrap a closure that already produced a `CourierError`.
pub(crate) fn flatten_call_err(e: tokio_rusqlite::Error<CourierError>) -> CourierError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner,
        other => CourierError::Storage {
            source: other.to_string().into(),
        },
    }
}
