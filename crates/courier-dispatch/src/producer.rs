// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Producer-facing submission: validation, destination normalization,
//! idempotency, and enqueue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::{CourierError, Job, JobHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::idempotency::IdempotencyGuard;
use crate::queue::JobQueue;
use crate::telemetry;

/// Largest batch accepted by [`Producer::submit_batch`].
pub const MAX_BATCH: usize = 100;

const MAX_KEY_LEN: usize = 255;
const MIN_DESTINATION_DIGITS: usize = 8;
const MAX_DESTINATION_DIGITS: usize = 15;

/// A send as a tenant submits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub tenant_id: String,
    pub destination: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl SendRequest {
    pub fn text(
        tenant_id: impl Into<String>,
        destination: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            destination: destination.into(),
            body_text: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// What happened to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Enqueued as a new job.
    Accepted(JobHandle),
    /// The idempotency key was already admitted; nothing was enqueued.
    Duplicate,
}

/// Strip formatting from a phone-style destination: surrounding whitespace,
/// `+`, spaces, dashes, and parentheses.
pub fn normalize_destination(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect()
}

/// Validate a request and turn it into a job with a fresh id.
pub fn build_job(request: &SendRequest) -> Result<Job, CourierError> {
    let tenant_id = request.tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(CourierError::Validation("tenant_id is required".into()));
    }

    let destination = normalize_destination(&request.destination);
    if destination.is_empty() {
        return Err(CourierError::Validation("destination is required".into()));
    }
    if !destination.chars().all(|c| c.is_ascii_digit())
        || !(MIN_DESTINATION_DIGITS..=MAX_DESTINATION_DIGITS).contains(&destination.len())
    {
        return Err(CourierError::Validation(format!(
            "destination must be {MIN_DESTINATION_DIGITS}-{MAX_DESTINATION_DIGITS} digits"
        )));
    }

    let body_text = non_blank(request.body_text.as_deref());
    let media_url = non_blank(request.media_url.as_deref());
    if body_text.is_none() && media_url.is_none() {
        return Err(CourierError::Validation(
            "either body_text or media_url is required".into(),
        ));
    }
    if let Some(url) = &media_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CourierError::Validation(
                "media_url must be an http(s) URL".into(),
            ));
        }
    }

    let idempotency_key = non_blank(request.idempotency_key.as_deref());
    if idempotency_key.as_ref().is_some_and(|k| k.len() > MAX_KEY_LEN) {
        return Err(CourierError::Validation(format!(
            "idempotency_key longer than {MAX_KEY_LEN} bytes"
        )));
    }

    Ok(Job {
        job_id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        destination,
        body_text,
        media_url,
        idempotency_key,
        scheduled_at: request.scheduled_at,
        attempt: 0,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Entry point for tenants submitting sends.
pub struct Producer {
    queue: Arc<JobQueue>,
    guard: Arc<IdempotencyGuard>,
}

impl Producer {
    pub fn new(queue: Arc<JobQueue>, guard: Arc<IdempotencyGuard>) -> Self {
        Self { queue, guard }
    }

    /// Validate, then admit the idempotency key and enqueue as one step.
    pub async fn submit(&self, request: &SendRequest) -> Result<SubmitOutcome, CourierError> {
        let job = build_job(request)?;

        let Some(handle) = self.queue.enqueue_once(&job, self.guard.ttl()).await? else {
            info!(tenant_id = %job.tenant_id, "duplicate submission ignored");
            telemetry::duplicate();
            return Ok(SubmitOutcome::Duplicate);
        };
        debug!(
            job_id = %handle.job_id,
            tenant_id = %job.tenant_id,
            destination = %courier_core::mask_destination(&job.destination),
            "submission accepted"
        );
        Ok(SubmitOutcome::Accepted(handle))
    }

    /// Submit up to [`MAX_BATCH`] requests. Each entry gets its own result;
    /// an invalid entry does not stop the rest of the batch.
    pub async fn submit_batch(
        &self,
        requests: &[SendRequest],
    ) -> Result<Vec<Result<SubmitOutcome, CourierError>>, CourierError> {
        if requests.len() > MAX_BATCH {
            return Err(CourierError::Validation(format!(
                "batch of {} exceeds the maximum of {MAX_BATCH}",
                requests.len()
            )));
        }
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.submit(request).await);
        }
        Ok(results)
    }
}
