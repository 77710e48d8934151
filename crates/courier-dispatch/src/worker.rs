// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-attempt dispatch state machine.
//!
//! `claimed → quota-check → channel-select → rate-limited-wait → sending`,
//! ending in either `delivered` or `attempt-failed`. The channel chosen at
//! selection is carried through to the end of the attempt, so every
//! outcome is attributed to the channel that was actually invoked.

use std::time::{Duration, Instant};

use chrono::Utc;
use courier_core::{
    ClaimedJob, CourierError, DeliveryRecord, DeliveryStatus, Job, MessageId, NackOutcome,
    OutboundClient, QuotaReservation, mask_destination,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::events::DispatchEvent;
use crate::selector::Selection;
use crate::telemetry;

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered {
        channel_id: String,
        provider_message_id: String,
    },
    /// Failed; the queue will retry after `retry_in`.
    Retrying {
        channel_id: Option<String>,
        retry_in: Duration,
    },
    /// Failed for the last time (or permanently); parked in the DLQ.
    DeadLettered {
        channel_id: Option<String>,
        dead_letter_id: String,
    },
    /// The tenant is out of quota; the job was rejected.
    QuotaExceeded,
    /// The claim lapsed before the attempt finished and another worker owns
    /// the job now.
    Stale,
}

pub struct DispatchWorker {
    id: usize,
    dispatcher: Dispatcher,
}

impl DispatchWorker {
    pub fn new(id: usize, dispatcher: Dispatcher) -> Self {
        Self { id, dispatcher }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Claim and process jobs until `cancel` fires. A send in progress is
    /// finished before the loop checks for cancellation again.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker = self.id, "dispatch worker started");
        let queue = self.dispatcher.queue();
        loop {
            let claimed = match queue.claim_next(&cancel).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    error!(worker = self.id, error = %e, "failed to claim job");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };
            let job_id = claimed.job.job_id.clone();
            if let Err(e) = self.process(claimed).await {
                error!(worker = self.id, job_id = %job_id, error = %e, "job processing failed");
            }
        }
        info!(worker = self.id, "dispatch worker stopped");
    }

    /// Run one attempt for a claimed job.
    ///
    /// Attempt-level failures are absorbed into a delivery record and a
    /// queue decision; only store failures while settling the job surface as
    /// errors.
    pub async fn process(&self, claimed: ClaimedJob) -> Result<AttemptOutcome, CourierError> {
        let job = &claimed.job;
        debug!(
            worker = self.id,
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            destination = %mask_destination(&job.destination),
            state = "claimed",
            "attempt started"
        );

        // quota-check
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            state = "quota_check",
            "state transition"
        );
        match self.dispatcher.quota.reserve_for(&claimed).await {
            Ok(QuotaReservation::Reserved) => {}
            Ok(QuotaReservation::Denied) => return self.quota_exceeded(&claimed).await,
            Ok(QuotaReservation::ClaimLost) => return Ok(AttemptOutcome::Stale),
            Err(e) => return self.attempt_failed(&claimed, None, e, false).await,
        }

        // channel-select
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            state = "channel_select",
            "state transition"
        );
        let selection = match self.dispatcher.selector.select(&job.destination).await {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                return self
                    .attempt_failed(&claimed, None, CourierError::NoChannelAvailable, true)
                    .await;
            }
            Err(e) => return self.attempt_failed(&claimed, None, e, true).await,
        };
        let channel_id = selection.channel_id.clone();

        // rate-limited-wait
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            channel_id = %channel_id,
            sticky = selection.sticky,
            state = "rate_limited_wait",
            "state transition"
        );
        match self.wait_for_slot(&claimed, &channel_id).await {
            Ok(true) => {}
            Ok(false) => return self.lease_lost(&claimed, &channel_id).await,
            Err(e) => return self.attempt_failed(&claimed, Some(&channel_id), e, true).await,
        }

        // sending
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            channel_id = %channel_id,
            state = "sending",
            "state transition"
        );
        let started = Instant::now();
        let timeout = self.dispatcher.settings.send_timeout;
        let sent = match tokio::time::timeout(timeout, send(selection.client.as_ref(), job)).await {
            Ok(result) => result,
            Err(_) => Err(CourierError::transient(format!(
                "send timed out after {}s",
                timeout.as_secs_f64()
            ))),
        };
        telemetry::send_latency(&channel_id, started.elapsed().as_secs_f64());

        match sent {
            Ok(message_id) => self.delivered(&claimed, &selection, message_id).await,
            Err(e) => self.attempt_failed(&claimed, Some(&channel_id), e, true).await,
        }
    }

    /// Take a rate slot on `channel_id`, renewing the claim while throttled so
    /// no other worker picks the job up mid-wait. Returns `false` once the
    /// claim is lost. On success the lease has just been renewed for the send.
    async fn wait_for_slot(
        &self,
        claimed: &ClaimedJob,
        channel_id: &str,
    ) -> Result<bool, CourierError> {
        let limiter = &self.dispatcher.limiter;
        let queue = &self.dispatcher.queue;
        while let Some(wait) = limiter.poll(channel_id, limiter.ceiling()).await? {
            let mut remaining = wait;
            while !remaining.is_zero() {
                let step = remaining.min(queue.renew_interval());
                tokio::time::sleep(step).await;
                remaining -= step;
                if !queue.extend(claimed).await? {
                    return Ok(false);
                }
            }
        }
        queue.extend(claimed).await
    }

    /// The claim lapsed before sending. The job belongs to whichever worker
    /// claimed it next, so hand the quota back and stop without a send.
    async fn lease_lost(
        &self,
        claimed: &ClaimedJob,
        channel_id: &str,
    ) -> Result<AttemptOutcome, CourierError> {
        let job = &claimed.job;
        if let Err(e) = self.dispatcher.quota.release_for(claimed).await {
            warn!(tenant_id = %job.tenant_id, error = %e, "failed to release quota");
        }
        warn!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            channel_id,
            "claim lost while waiting to send, attempt abandoned"
        );
        Ok(AttemptOutcome::Stale)
    }

    async fn delivered(
        &self,
        claimed: &ClaimedJob,
        selection: &Selection,
        message_id: MessageId,
    ) -> Result<AttemptOutcome, CourierError> {
        let job = &claimed.job;
        let channel_id = selection.channel_id.as_str();

        // The message is out; bookkeeping failures are logged, never retried,
        // so the send is not repeated.
        let record = delivery_record(
            job,
            DeliveryStatus::Sent,
            Some(channel_id),
            None,
            Some(message_id.0.clone()),
        );
        if let Err(e) = self.dispatcher.store.insert_delivery(&record).await {
            error!(job_id = %job.job_id, channel_id, error = %e, "failed to record delivery");
        }
        if let Err(e) = self.dispatcher.registry.record_outcome(channel_id, true).await {
            warn!(channel_id, error = %e, "failed to record channel success");
        }
        if !selection.sticky
            && let Err(e) = self.dispatcher.selector.remember(&job.destination, channel_id).await
        {
            warn!(channel_id, error = %e, "failed to persist sticky mapping");
        }

        let acked = self.dispatcher.queue.ack(claimed).await?;
        telemetry::delivery("sent", Some(channel_id));
        info!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            channel_id,
            provider_message_id = %message_id.0,
            state = "delivered",
            "message delivered"
        );
        self.dispatcher.events.publish(DispatchEvent::Delivered {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            channel_id: channel_id.to_string(),
            attempt: job.attempt,
            provider_message_id: message_id.0.clone(),
        });

        if !acked {
            return Ok(AttemptOutcome::Stale);
        }
        Ok(AttemptOutcome::Delivered {
            channel_id: channel_id.to_string(),
            provider_message_id: message_id.0,
        })
    }

    async fn quota_exceeded(&self, claimed: &ClaimedJob) -> Result<AttemptOutcome, CourierError> {
        let job = &claimed.job;
        let error = CourierError::QuotaExceeded {
            tenant_id: job.tenant_id.clone(),
        };
        let detail = error_detail(&error);
        let record = delivery_record(job, DeliveryStatus::Failed, None, Some(detail.clone()), None);
        if let Err(e) = self.dispatcher.store.insert_delivery(&record).await {
            error!(job_id = %job.job_id, error = %e, "failed to record quota rejection");
        }

        let removed = self.dispatcher.queue.reject(claimed, &detail).await?;
        telemetry::delivery("failed", None);
        warn!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            state = "attempt_failed",
            "tenant quota exhausted, job rejected"
        );
        self.dispatcher.events.publish(DispatchEvent::AttemptFailed {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            channel_id: None,
            attempt: job.attempt,
            error: detail,
        });

        if !removed {
            return Ok(AttemptOutcome::Stale);
        }
        Ok(AttemptOutcome::QuotaExceeded)
    }

    /// Settle a failed attempt. `reserved` says whether quota was taken and
    /// must be given back.
    async fn attempt_failed(
        &self,
        claimed: &ClaimedJob,
        channel_id: Option<&str>,
        error: CourierError,
        reserved: bool,
    ) -> Result<AttemptOutcome, CourierError> {
        let job = &claimed.job;
        let detail = error_detail(&error);

        if reserved && let Err(e) = self.dispatcher.quota.release_for(claimed).await {
            warn!(tenant_id = %job.tenant_id, error = %e, "failed to release quota");
        }

        let record = delivery_record(
            job,
            DeliveryStatus::Failed,
            channel_id,
            Some(detail.clone()),
            None,
        );
        if let Err(e) = self.dispatcher.store.insert_delivery(&record).await {
            error!(job_id = %job.job_id, error = %e, "failed to record failed attempt");
        }
        if let Some(channel_id) = channel_id
            && let Err(e) = self.dispatcher.registry.record_outcome(channel_id, false).await
        {
            warn!(channel_id, error = %e, "failed to record channel failure");
        }
        telemetry::delivery("failed", channel_id);
        warn!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempt,
            channel_id,
            error = %error,
            state = "attempt_failed",
            "send attempt failed"
        );
        self.dispatcher.events.publish(DispatchEvent::AttemptFailed {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            channel_id: channel_id.map(str::to_string),
            attempt: job.attempt,
            error: detail.clone(),
        });

        let queue = &self.dispatcher.queue;
        let permanent = matches!(error, CourierError::SendPermanent { .. });
        let outcome = if permanent && self.dispatcher.settings.dead_letter_permanent_errors {
            queue.dead_letter(claimed, &detail).await?
        } else {
            queue.nack(claimed, &detail).await?
        };

        let channel_id = channel_id.map(str::to_string);
        Ok(match outcome {
            NackOutcome::Retrying { retry_in, .. } => AttemptOutcome::Retrying {
                channel_id,
                retry_in,
            },
            NackOutcome::DeadLettered { dead_letter_id } => {
                self.dispatcher.events.publish(DispatchEvent::DeadLettered {
                    job_id: job.job_id.clone(),
                    tenant_id: job.tenant_id.clone(),
                    dead_letter_id: dead_letter_id.clone(),
                });
                AttemptOutcome::DeadLettered {
                    channel_id,
                    dead_letter_id,
                }
            }
            NackOutcome::Stale => AttemptOutcome::Stale,
        })
    }
}

async fn send(client: &dyn OutboundClient, job: &Job) -> Result<MessageId, CourierError> {
    match (&job.media_url, &job.body_text) {
        (Some(url), caption) => {
            client
                .send_media(&job.destination, url, caption.as_deref())
                .await
        }
        (None, Some(text)) => client.send_text(&job.destination, text).await,
        (None, None) => Err(CourierError::permanent("job has neither text nor media")),
    }
}

fn error_detail(error: &CourierError) -> String {
    format!("{}: {error}", error.kind())
}

fn delivery_record(
    job: &Job,
    status: DeliveryStatus,
    channel_used: Option<&str>,
    error_detail: Option<String>,
    provider_message_id: Option<String>,
) -> DeliveryRecord {
    DeliveryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        job_id: job.job_id.clone(),
        tenant_id: job.tenant_id.clone(),
        destination: job.destination.clone(),
        status,
        channel_used: channel_used.map(str::to_string),
        error_detail,
        attempt: job.attempt,
        provider_message_id,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            job_id: "j1".into(),
            tenant_id: "t1".into(),
            destination: "5511999990000".into(),
            body_text: Some("hi".into()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 2,
        }
    }

    #[test]
    fn error_detail_leads_with_kind() {
        let detail = error_detail(&CourierError::QuotaExceeded {
            tenant_id: "t1".into(),
        });
        assert!(detail.starts_with("quota_exceeded: "));
        assert!(error_detail(&CourierError::NoChannelAvailable).starts_with("no_channel_available"));
    }

    #[test]
    fn delivery_record_copies_job_fields() {
        let record = delivery_record(
            &job(),
            DeliveryStatus::Failed,
            Some("chip-a"),
            Some("send_transient: boom".into()),
            None,
        );
        assert_eq!(record.job_id, "j1");
        assert_eq!(record.attempt, 2);
        assert_eq!(record.channel_used.as_deref(), Some("chip-a"));
        assert_eq!(record.status, DeliveryStatus::Failed);
    }
}
