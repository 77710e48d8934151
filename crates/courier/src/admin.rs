// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator subcommands that work directly against the store.
//!
//! Each command opens the database, does one thing, and returns the text to
//! print. None of them needs live channel clients.

use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_config::CourierConfig;
use courier_core::{
    ChipFilter, CourierError, DeliveryQuery, DeliveryStatus, StorageAdapter, mask_destination,
};
use courier_dispatch::queue::due_in;
use courier_dispatch::{Dispatcher, SendRequest, SubmitOutcome};
use courier_storage::SqliteStore;

/// An open store plus the dispatch components built on it.
pub struct Admin {
    store: Arc<SqliteStore>,
    dispatcher: Dispatcher,
}

/// Open the store, run `command`, and close the store again.
pub async fn run<F, Fut>(config: &CourierConfig, command: F) -> Result<String, CourierError>
where
    F: FnOnce(Admin) -> Fut,
    Fut: Future<Output = Result<String, CourierError>>,
{
    let admin = Admin::open(config).await?;
    let store = Arc::clone(&admin.store);
    let output = command(admin).await;
    store.close().await?;
    output
}

pub fn request_from_args(
    tenant_id: String,
    destination: String,
    body_text: Option<String>,
    media_url: Option<String>,
    idempotency_key: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
) -> SendRequest {
    SendRequest {
        tenant_id,
        destination,
        body_text,
        media_url,
        idempotency_key,
        scheduled_at,
    }
}

fn describe_outcome(outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Accepted(handle) => {
            let wait = due_in(handle);
            if wait.is_zero() {
                format!("accepted {}", handle.job_id)
            } else {
                format!(
                    "accepted {} (due {})",
                    handle.job_id,
                    handle.visible_at.to_rfc3339()
                )
            }
        }
        SubmitOutcome::Duplicate => "duplicate, ignored".to_string(),
    }
}

impl Admin {
    pub async fn open(config: &CourierConfig) -> Result<Self, CourierError> {
        let store = Arc::new(SqliteStore::open(config.storage.clone()).await?);
        let dispatcher = Dispatcher::from_config(store.clone(), config);
        Ok(Self { store, dispatcher })
    }

    pub async fn submit(&self, request: &SendRequest) -> Result<String, CourierError> {
        let outcome = self.dispatcher.producer().submit(request).await?;
        Ok(describe_outcome(&outcome))
    }

    /// Submit a JSON array of requests. Each line of output reports one entry.
    pub async fn submit_file(&self, path: &Path) -> Result<String, CourierError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CourierError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        let requests: Vec<SendRequest> = serde_json::from_str(&content).map_err(|e| {
            CourierError::Validation(format!("{} is not a JSON array of requests: {e}", path.display()))
        })?;

        let results = self.dispatcher.producer().submit_batch(&requests).await?;
        let mut out = String::new();
        for (i, result) in results.iter().enumerate() {
            let line = match result {
                Ok(outcome) => describe_outcome(outcome),
                Err(e) => format!("rejected: {e}"),
            };
            let _ = writeln!(out, "[{i}] {line}");
        }
        Ok(out.trim_end().to_string())
    }

    pub async fn list_chips(&self, include_inactive: bool) -> Result<String, CourierError> {
        let chips = self
            .dispatcher
            .registry()
            .list(&ChipFilter {
                status: None,
                include_inactive,
            })
            .await?;
        if chips.is_empty() {
            return Ok("no chips provisioned".to_string());
        }

        let mut out = format!(
            "{:<16} {:<16} {:<13} {:>6} {:>6} {:>6}  LAST USED",
            "CHANNEL", "IDENTITY", "STATUS", "OK", "FAIL", "SCORE"
        );
        for chip in chips {
            let status = if chip.active {
                chip.status.to_string()
            } else {
                format!("{} (off)", chip.status)
            };
            let last_used = chip
                .last_used_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let _ = write!(
                out,
                "\n{:<16} {:<16} {:<13} {:>6} {:>6} {:>6}  {last_used}",
                chip.channel_id,
                chip.destination_identity,
                status,
                chip.success_count,
                chip.failure_count,
                chip.reputation(),
            );
        }
        Ok(out)
    }

    pub async fn set_quota(&self, tenant_id: &str, limit: i64) -> Result<String, CourierError> {
        let counter = self.dispatcher.quota().set_limit(tenant_id, limit).await?;
        Ok(format!(
            "tenant {}: limit {}",
            counter.tenant_id,
            format_limit(counter.limit)
        ))
    }

    pub async fn show_quota(&self, tenant_id: &str) -> Result<String, CourierError> {
        let counter = self
            .dispatcher
            .quota()
            .get(tenant_id)
            .await?
            .ok_or_else(|| CourierError::NotFound {
                entity: "tenant quota",
                id: tenant_id.to_string(),
            })?;
        Ok(format!(
            "tenant {}: {} of {} sent, period resets {}",
            counter.tenant_id,
            counter.sent_this_period,
            format_limit(counter.limit),
            counter.period_reset_at.to_rfc3339()
        ))
    }

    pub async fn list_dead_letters(
        &self,
        tenant_id: Option<&str>,
        limit: u32,
    ) -> Result<String, CourierError> {
        let letters = self.dispatcher.queue().list_dead_letters(tenant_id, limit).await?;
        if letters.is_empty() {
            return Ok("dead letter queue is empty".to_string());
        }
        let mut out = String::new();
        for letter in letters {
            let _ = writeln!(
                out,
                "{}  job={} tenant={} attempts={} at={}\n    {}",
                letter.id,
                letter.job_id,
                letter.tenant_id,
                letter.attempts,
                letter.created_at.to_rfc3339(),
                letter.reason
            );
        }
        Ok(out.trim_end().to_string())
    }

    pub async fn requeue(&self, dead_letter_id: &str) -> Result<String, CourierError> {
        match self
            .dispatcher
            .queue()
            .requeue_dead_letter(dead_letter_id)
            .await?
        {
            Some(job_id) => Ok(format!("requeued as job {job_id}")),
            None => Err(CourierError::NotFound {
                entity: "dead letter",
                id: dead_letter_id.to_string(),
            }),
        }
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        status: Option<DeliveryStatus>,
        limit: u32,
        json: bool,
    ) -> Result<String, CourierError> {
        let mut query = DeliveryQuery::for_tenant(tenant_id);
        query.status = status;
        query.limit = limit;
        let mut records = self.dispatcher.history(&query).await?;
        for record in &mut records {
            record.destination = mask_destination(&record.destination);
        }

        if json {
            let lines: Result<Vec<String>, _> =
                records.iter().map(serde_json::to_string).collect();
            return lines
                .map(|lines| lines.join("\n"))
                .map_err(|e| CourierError::Internal(format!("failed to encode history: {e}")));
        }

        if records.is_empty() {
            return Ok(format!("no deliveries for tenant {tenant_id}"));
        }
        let mut out = String::new();
        for record in records {
            let _ = writeln!(
                out,
                "{}  {:<6} {:<12} via {:<12} attempt {}  job {}{}",
                record.created_at.to_rfc3339(),
                record.status,
                record.destination,
                record.channel_used.as_deref().unwrap_or("-"),
                record.attempt,
                record.job_id,
                record
                    .error_detail
                    .map(|detail| format!("\n    {detail}"))
                    .unwrap_or_default()
            );
        }
        Ok(out.trim_end().to_string())
    }

    pub async fn cancel(&self, job_id: &str) -> Result<String, CourierError> {
        if self.dispatcher.queue().cancel(job_id).await? {
            Ok(format!("cancelled {job_id}"))
        } else {
            Err(CourierError::NotFound {
                entity: "pending job",
                id: job_id.to_string(),
            })
        }
    }

    pub async fn stats(&self) -> Result<String, CourierError> {
        let stats = self.dispatcher.queue().stats().await?;
        Ok(format!(
            "pending {}  scheduled {}  in flight {}  dead {}",
            stats.pending, stats.scheduled, stats.in_flight, stats.dead
        ))
    }
}

fn format_limit(limit: i64) -> String {
    if limit < 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}
