// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two store handles on one database file stand in for two relay processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_config::model::StorageConfig;
use courier_core::{DispatchStore, Job};
use courier_storage::SqliteStore;

const PERIOD: Duration = Duration::from_secs(30 * 86_400);

async fn two_stores() -> (Arc<SqliteStore>, Arc<SqliteStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        database_path: dir.path().join("shared.db").to_string_lossy().into_owned(),
        wal_mode: true,
    };
    let a = SqliteStore::open(config.clone()).await.unwrap();
    let b = SqliteStore::open(config).await.unwrap();
    (Arc::new(a), Arc::new(b), dir)
}

#[tokio::test]
async fn quota_holds_across_handles() {
    let (a, b, _dir) = two_stores().await;
    a.set_quota_limit("tenant", 25, Utc::now(), PERIOD)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..60 {
        let store = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            store
                .reserve_quota("tenant", Utc::now(), PERIOD)
                .await
                .unwrap()
        }));
    }

    let mut granted = 0;
    for h in handles {
        if h.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 25);
    let counter = b.get_quota("tenant").await.unwrap().unwrap();
    assert_eq!(counter.sent_this_period, 25);
}

#[tokio::test]
async fn jobs_are_claimed_once_across_handles() {
    let (a, b, _dir) = two_stores().await;
    let now = Utc::now();
    for i in 0..30 {
        let job = Job {
            job_id: format!("job-{i}"),
            tenant_id: "tenant".into(),
            destination: "5511999990000".into(),
            body_text: Some("hi".into()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 0,
        };
        a.enqueue_job(&job, now, 5, now).await.unwrap();
    }

    let mut handles = Vec::new();
    for store in [a.clone(), b.clone(), a.clone(), b.clone()] {
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(claimed) = store
                .claim_job(Utc::now(), Duration::from_secs(60))
                .await
                .unwrap()
            {
                mine.push(claimed.job.job_id);
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 30);
}

#[tokio::test]
async fn idempotency_key_admitted_once_across_handles() {
    let (a, b, _dir) = two_stores().await;
    let ttl = Duration::from_secs(3_600);
    let mut handles = Vec::new();
    for i in 0..10 {
        let store = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            store
                .admit_idempotency_key("tenant", "order-7", Utc::now(), ttl)
                .await
                .unwrap()
        }));
    }
    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}
