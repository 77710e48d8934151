// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the dispatch core, its store, and its adapters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier returned by the outbound client for an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`crate::PluginAdapter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Outbound,
    Storage,
    Observability,
}

/// Connectivity of an outbound channel as last reported by its client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Outcome stored on a delivery record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

// --- Jobs ---

/// A pending send, exactly as the producer submitted it.
///
/// The queue stores this payload verbatim; `attempt` is filled in from queue
/// bookkeeping when the job is claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub tenant_id: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Number of claims made so far, including the current one.
    #[serde(default)]
    pub attempt: u32,
}

/// A job handed to exactly one worker.
///
/// The claim token identifies this particular claim. Once the visibility
/// window lapses the job may be claimed again under a new token, and the old
/// token can no longer ack or nack it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: Job,
    pub claim_token: String,
    pub max_attempts: u32,
    pub visible_until: DateTime<Utc>,
}

impl ClaimedJob {
    /// Whether this is the last attempt the queue will allow.
    pub fn is_final_attempt(&self) -> bool {
        self.job.attempt >= self.max_attempts
    }
}

/// Receipt for an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub visible_at: DateTime<Utc>,
}

/// What the queue did with a negatively acknowledged job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The job will become claimable again after `retry_in`.
    Retrying { attempt: u32, retry_in: Duration },
    /// The retry ceiling was reached; the payload now lives in the DLQ.
    DeadLettered { dead_letter_id: String },
    /// The claim had already lapsed and another worker owns the job.
    Stale,
}

/// Result of taking quota on behalf of a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReservation {
    /// One unit was taken and is recorded against the claim.
    Reserved,
    /// The tenant is at its limit or has no quota row.
    Denied,
    /// The claim token no longer holds the job; nothing was taken.
    ClaimLost,
}

/// A job that exhausted its attempts, kept for inspection or replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub job_id: String,
    pub tenant_id: String,
    /// The job payload as originally enqueued (JSON).
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Decode the preserved payload back into a job.
    pub fn job(&self) -> Result<Job, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Point-in-time queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Due and waiting for a worker.
    pub pending: u64,
    /// Waiting for a future visibility time (scheduled sends and backoff).
    pub scheduled: u64,
    /// Claimed and still inside the visibility window.
    pub in_flight: u64,
    /// Parked in the dead letter queue.
    pub dead: u64,
}

// --- Channels ---

/// One outbound messaging identity ("chip").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chip {
    pub channel_id: String,
    /// The sender identity (e.g. phone number) the channel sends as.
    pub destination_identity: String,
    pub status: ConnectionStatus,
    /// Logical deactivation flag. Chips are never deleted.
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chip {
    /// Reputation score used for ranking.
    pub fn reputation(&self) -> i64 {
        self.success_count - self.failure_count
    }
}

/// Filter for listing chips.
#[derive(Debug, Clone, Default)]
pub struct ChipFilter {
    pub status: Option<ConnectionStatus>,
    pub include_inactive: bool,
}

/// Asynchronous events reported by an outbound client about its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session needs pairing; `payload` is the challenge to show an operator.
    QrChallenge { channel_id: String, payload: String },
    /// The session's connectivity changed.
    StatusChange {
        channel_id: String,
        status: ConnectionStatus,
    },
}

// --- Quota ---

/// Per-tenant allowance for the current period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaCounter {
    pub tenant_id: String,
    pub sent_this_period: i64,
    /// `-1` means unlimited.
    pub limit: i64,
    pub period_reset_at: DateTime<Utc>,
}

impl QuotaCounter {
    pub const UNLIMITED: i64 = -1;

    pub fn is_unlimited(&self) -> bool {
        self.limit == Self::UNLIMITED
    }

    /// Remaining sends in this period, `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        if self.is_unlimited() {
            None
        } else {
            Some((self.limit - self.sent_this_period).max(0))
        }
    }
}

// --- Deliveries ---

/// Immutable audit row written once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub destination: String,
    pub status: DeliveryStatus,
    /// The channel actually invoked for this attempt, if one was selected.
    pub channel_used: Option<String>,
    pub error_detail: Option<String>,
    pub attempt: u32,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tenant history query.
#[derive(Debug, Clone)]
pub struct DeliveryQuery {
    pub tenant_id: String,
    pub status: Option<DeliveryStatus>,
    pub destination: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl DeliveryQuery {
    /// Default page size for history queries.
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            status: None,
            destination: None,
            since: None,
            until: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Per-channel delivery totals for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDeliveryCount {
    pub channel_used: Option<String>,
    pub sent: u64,
    pub failed: u64,
}

/// Mask a destination for logs and history listings (first six characters).
pub fn mask_destination(destination: &str) -> String {
    let prefix: String = destination.chars().take(6).collect();
    format!("{prefix}...")
}
