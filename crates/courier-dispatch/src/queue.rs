// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable job queue with delayed visibility, claim leases, exponential
//! backoff, and a dead letter queue.
//!
//! Every state change is one atomic store call guarded by the claim token,
//! so a worker whose lease lapsed cannot ack or nack a job that another
//! worker has since claimed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use courier_config::model::QueueConfig;
use courier_core::{
    ClaimedJob, CourierError, DeadLetter, DispatchStore, Job, JobHandle, NackOutcome, QueueStats,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telemetry;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            multiplier: config.backoff_multiplier,
            max_delay: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// Delay before the attempt that follows failed attempt number `attempt`
    /// (1-based): `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

pub struct JobQueue {
    store: Arc<dyn DispatchStore>,
    policy: RetryPolicy,
    visibility: Duration,
    poll_interval: Duration,
    notify: Notify,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        policy: RetryPolicy,
        visibility: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            visibility,
            poll_interval,
            notify: Notify::new(),
        }
    }

    pub fn from_config(store: Arc<dyn DispatchStore>, config: &QueueConfig) -> Self {
        Self::new(
            store,
            RetryPolicy::from_config(config),
            config.visibility_timeout(),
            config.poll_interval(),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// How long a claim hides a job before another worker may take it.
    pub fn visibility(&self) -> Duration {
        self.visibility
    }

    /// How often a worker holding a claim should extend it.
    pub fn renew_interval(&self) -> Duration {
        (self.visibility / 3).max(Duration::from_millis(10))
    }

    /// Persist `job`. It becomes claimable after `delay`, or at
    /// `job.scheduled_at` if that is later.
    pub async fn enqueue(&self, job: &Job, delay: Option<Duration>) -> Result<JobHandle, CourierError> {
        let now = Utc::now();
        let visible_at = visible_at(job, delay, now);
        self.store
            .enqueue_job(job, visible_at, self.policy.max_attempts, now)
            .await?;
        Ok(self.enqueued(job, visible_at, now))
    }

    /// Persist `job` unless its idempotency key was admitted within `key_ttl`.
    /// The key and the job are written together, so a failed enqueue leaves
    /// the key free for a retry.
    pub async fn enqueue_once(
        &self,
        job: &Job,
        key_ttl: Duration,
    ) -> Result<Option<JobHandle>, CourierError> {
        let now = Utc::now();
        let visible_at = visible_at(job, None, now);
        let enqueued = self
            .store
            .enqueue_job_once(job, visible_at, self.policy.max_attempts, key_ttl, now)
            .await?;
        if !enqueued {
            return Ok(None);
        }
        Ok(Some(self.enqueued(job, visible_at, now)))
    }

    fn enqueued(&self, job: &Job, visible_at: DateTime<Utc>, now: DateTime<Utc>) -> JobHandle {
        debug!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            delayed = visible_at > now,
            "job enqueued"
        );
        if visible_at <= now {
            self.notify.notify_one();
        }
        JobHandle {
            job_id: job.job_id.clone(),
            visible_at,
        }
    }

    /// Claim the oldest due job, if any.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>, CourierError> {
        let claimed = self.store.claim_job(Utc::now(), self.visibility).await?;
        if let Some(claimed) = &claimed {
            debug!(
                job_id = %claimed.job.job_id,
                tenant_id = %claimed.job.tenant_id,
                attempt = claimed.job.attempt,
                "job claimed"
            );
        }
        Ok(claimed)
    }

    /// Wait for a due job. Wakes on local enqueues and polls for everything
    /// else (scheduled jobs, backoff expiry, other processes). Returns `None`
    /// once `cancel` fires.
    pub async fn claim_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ClaimedJob>, CourierError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(claimed) = self.claim().await? {
                return Ok(Some(claimed));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Renew the lease on a held job for another visibility timeout.
    /// `false` means the claim had already lapsed and was taken over.
    pub async fn extend(&self, claimed: &ClaimedJob) -> Result<bool, CourierError> {
        let now = Utc::now();
        let extended = self
            .store
            .extend_claim(
                &claimed.job.job_id,
                &claimed.claim_token,
                after(now, self.visibility),
                now,
            )
            .await?;
        if !extended {
            warn!(job_id = %claimed.job.job_id, "lease renewal after claim lapsed");
        }
        Ok(extended)
    }

    /// Acknowledge a finished job. `false` means the claim had lapsed.
    pub async fn ack(&self, claimed: &ClaimedJob) -> Result<bool, CourierError> {
        let removed = self
            .store
            .remove_claimed_job(&claimed.job.job_id, &claimed.claim_token)
            .await?;
        if !removed {
            warn!(job_id = %claimed.job.job_id, "ack after claim lapsed");
        }
        Ok(removed)
    }

    /// Report a failed attempt. The job is retried after backoff, or moved to
    /// the dead letter queue once it has used its last attempt.
    pub async fn nack(&self, claimed: &ClaimedJob, reason: &str) -> Result<NackOutcome, CourierError> {
        if claimed.is_final_attempt() {
            return self.dead_letter(claimed, reason).await;
        }

        let attempt = claimed.job.attempt;
        let retry_in = self.policy.delay_for(attempt);
        let now = Utc::now();
        let retried = self
            .store
            .retry_job(
                &claimed.job.job_id,
                &claimed.claim_token,
                after(now, retry_in),
                reason,
                now,
            )
            .await?;
        if !retried {
            warn!(job_id = %claimed.job.job_id, "nack after claim lapsed");
            return Ok(NackOutcome::Stale);
        }
        debug!(
            job_id = %claimed.job.job_id,
            attempt,
            retry_in_ms = retry_in.as_millis() as u64,
            "job scheduled for retry"
        );
        Ok(NackOutcome::Retrying { attempt, retry_in })
    }

    /// Move a claimed job to the dead letter queue now.
    pub async fn dead_letter(
        &self,
        claimed: &ClaimedJob,
        reason: &str,
    ) -> Result<NackOutcome, CourierError> {
        let moved = self
            .store
            .dead_letter_job(&claimed.job.job_id, &claimed.claim_token, reason, Utc::now())
            .await?;
        match moved {
            Some(dead_letter_id) => {
                warn!(
                    job_id = %claimed.job.job_id,
                    tenant_id = %claimed.job.tenant_id,
                    attempts = claimed.job.attempt,
                    reason,
                    "job dead-lettered"
                );
                telemetry::dead_letter();
                Ok(NackOutcome::DeadLettered { dead_letter_id })
            }
            None => {
                warn!(job_id = %claimed.job.job_id, "dead-letter after claim lapsed");
                Ok(NackOutcome::Stale)
            }
        }
    }

    /// Drop a claimed job without retrying or dead-lettering it.
    pub async fn reject(&self, claimed: &ClaimedJob, reason: &str) -> Result<bool, CourierError> {
        let removed = self
            .store
            .remove_claimed_job(&claimed.job.job_id, &claimed.claim_token)
            .await?;
        if removed {
            info!(
                job_id = %claimed.job.job_id,
                tenant_id = %claimed.job.tenant_id,
                reason,
                "job rejected"
            );
        }
        Ok(removed)
    }

    /// Remove a job that is still waiting for its scheduled time.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, CourierError> {
        let cancelled = self.store.cancel_job(job_id, Utc::now()).await?;
        if cancelled {
            info!(job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    pub async fn list_dead_letters(
        &self,
        tenant_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetter>, CourierError> {
        self.store.list_dead_letters(tenant_id, limit).await
    }

    /// Replay a dead letter as a fresh job with a full set of attempts.
    pub async fn requeue_dead_letter(&self, dead_letter_id: &str) -> Result<Option<String>, CourierError> {
        let job_id = self
            .store
            .requeue_dead_letter(dead_letter_id, self.policy.max_attempts, Utc::now())
            .await?;
        if let Some(job_id) = &job_id {
            info!(dead_letter_id, job_id = %job_id, "dead letter requeued");
            self.notify.notify_one();
        }
        Ok(job_id)
    }

    pub async fn stats(&self) -> Result<QueueStats, CourierError> {
        self.store.queue_stats(Utc::now()).await
    }
}

fn visible_at(job: &Job, delay: Option<Duration>, now: DateTime<Utc>) -> DateTime<Utc> {
    let visible_at = after(now, delay.unwrap_or_default());
    job.scheduled_at.map_or(visible_at, |scheduled| visible_at.max(scheduled))
}

/// `start + duration`, saturating at the latest representable time.
pub(crate) fn after(start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// When a job handle becomes due, relative to now.
pub fn due_in(handle: &JobHandle) -> Duration {
    (handle.visible_at - Utc::now()).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::model::StorageConfig;
    use courier_storage::SqliteStore;

    fn job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            tenant_id: "t1".to_string(),
            destination: "5511999990000".to_string(),
            body_text: Some("hello".to_string()),
            media_url: None,
            idempotency_key: None,
            scheduled_at: None,
            attempt: 0,
        }
    }

    async fn queue(policy: RetryPolicy, visibility: Duration) -> (JobQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_path: dir.path().join("queue.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };
        let store = SqliteStore::open(config).await.unwrap();
        let queue = JobQueue::new(Arc::new(store), policy, visibility, Duration::from_millis(20));
        (queue, dir)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 2.0,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(20), Duration::from_secs(3600));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn backoff_treats_attempt_zero_like_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_ack_removes() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.job.attempt, 1);
        assert!(queue.claim().await.unwrap().is_none());

        assert!(queue.ack(&claimed).await.unwrap());
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn delayed_job_is_not_claimable_early() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        let handle = queue
            .enqueue(&job("j1"), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert!(due_in(&handle) > Duration::from_secs(3500));
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().scheduled, 1);
    }

    #[tokio::test]
    async fn scheduled_at_in_future_delays_claim() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        let mut scheduled = job("j1");
        scheduled.scheduled_at = Some(Utc::now() + TimeDelta::hours(1));
        queue.enqueue(&scheduled, None).await.unwrap();
        assert!(queue.claim().await.unwrap().is_none());
        assert!(queue.cancel("j1").await.unwrap());
        assert_eq!(queue.stats().await.unwrap().scheduled, 0);
    }

    #[tokio::test]
    async fn due_job_cannot_be_cancelled() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        assert!(!queue.cancel("j1").await.unwrap());
    }

    #[tokio::test]
    async fn nack_retries_then_dead_letters_once() {
        let (queue, _dir) = queue(fast_policy(3), Duration::from_secs(60)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();

        for expected in 1..=2 {
            let claimed = queue.claim().await.unwrap().unwrap();
            assert_eq!(claimed.job.attempt, expected);
            let outcome = queue.nack(&claimed, "boom").await.unwrap();
            assert!(matches!(outcome, NackOutcome::Retrying { attempt, .. } if attempt == expected));
        }

        let last = queue.claim().await.unwrap().unwrap();
        assert!(last.is_final_attempt());
        let outcome = queue.nack(&last, "boom").await.unwrap();
        assert!(matches!(outcome, NackOutcome::DeadLettered { .. }));

        let letters = queue.list_dead_letters(None, 10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].job().unwrap().body_text.as_deref(), Some("hello"));
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lapsed_claim_is_reclaimed_and_old_token_goes_stale() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_millis(50)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();

        let first = queue.claim().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.job.attempt, 2);

        assert!(!queue.ack(&first).await.unwrap());
        assert_eq!(queue.nack(&first, "late").await.unwrap(), NackOutcome::Stale);
        assert!(queue.ack(&second).await.unwrap());
    }

    #[tokio::test]
    async fn reject_removes_without_dead_letter() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        assert!(queue.reject(&claimed, "quota exceeded").await.unwrap());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.dead, 0);
        assert_eq!(stats.pending + stats.in_flight, 0);
    }

    #[tokio::test]
    async fn requeued_dead_letter_gets_fresh_attempts() {
        let (queue, _dir) = queue(fast_policy(1), Duration::from_secs(60)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        let NackOutcome::DeadLettered { dead_letter_id } =
            queue.nack(&claimed, "boom").await.unwrap()
        else {
            panic!("expected dead letter");
        };

        let job_id = queue.requeue_dead_letter(&dead_letter_id).await.unwrap().unwrap();
        let replay = queue.claim().await.unwrap().unwrap();
        assert_eq!(replay.job.job_id, job_id);
        assert_eq!(replay.job.attempt, 1);
        assert!(queue.requeue_dead_letter(&dead_letter_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_wakes_on_enqueue_and_stops_on_cancel() {
        let (queue, _dir) = queue(fast_policy(5), Duration::from_secs(60)).await;
        let queue = Arc::new(queue);
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.claim_next(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        let claimed = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(claimed.job.job_id, "j1");

        cancel.cancel();
        assert!(queue.claim_next(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_keeps_a_slow_claim_exclusive() {
        let (queue, _dir) = queue(fast_policy(3), Duration::from_millis(150)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        let held = queue.claim().await.unwrap().unwrap();
        assert_eq!(queue.renew_interval(), Duration::from_millis(50));

        for _ in 0..4 {
            tokio::time::sleep(queue.renew_interval()).await;
            assert!(queue.extend(&held).await.unwrap());
            assert!(queue.claim().await.unwrap().is_none());
        }
        assert!(queue.ack(&held).await.unwrap());
    }

    #[tokio::test]
    async fn extend_fails_once_claim_was_taken_over() {
        let (queue, _dir) = queue(fast_policy(3), Duration::from_millis(40)).await;
        queue.enqueue(&job("j1"), None).await.unwrap();
        let first = queue.claim().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = queue.claim().await.unwrap().unwrap();

        assert!(!queue.extend(&first).await.unwrap());
        assert!(queue.extend(&second).await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_once_returns_none_for_live_key() {
        let (queue, _dir) = queue(fast_policy(3), Duration::from_secs(30)).await;
        let ttl = Duration::from_secs(60);
        let mut first = job("j1");
        first.idempotency_key = Some("k".into());
        let mut second = job("j2");
        second.idempotency_key = Some("k".into());

        assert!(queue.enqueue_once(&first, ttl).await.unwrap().is_some());
        assert!(queue.enqueue_once(&second, ttl).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }
}
