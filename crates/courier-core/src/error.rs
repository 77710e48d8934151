// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Courier dispatch core.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Courier adapter traits and core operations.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A malformed send request, rejected at submission and never enqueued.
    #[error("validation error: {0}")]
    Validation(String),

    /// The idempotency key was already admitted for this tenant.
    #[error("duplicate request for idempotency key `{key}`")]
    DuplicateRequest { key: String },

    /// The tenant has no remaining allowance for the current period.
    #[error("message quota exhausted for tenant {tenant_id}")]
    QuotaExceeded { tenant_id: String },

    /// No connected channel is able to take the send right now.
    #[error("no outbound channel available")]
    NoChannelAvailable,

    /// Network, timeout, or session failure reported by the outbound client.
    #[error("transient send failure: {message}")]
    SendTransient {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The outbound client rejected the send in a way that looks permanent
    /// (for example an invalid destination).
    #[error("permanent send failure: {message}")]
    SendPermanent {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Wrap any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }

    /// Transient send failure without an underlying source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::SendTransient {
            message: message.into(),
            source: None,
        }
    }

    /// Permanent send failure without an underlying source.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::SendPermanent {
            message: message.into(),
            source: None,
        }
    }

    /// Short machine-readable classification, used for metric labels and
    /// delivery record error details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Storage { .. } => "storage",
            Self::Validation(_) => "validation",
            Self::DuplicateRequest { .. } => "duplicate_request",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::NoChannelAvailable => "no_channel_available",
            Self::SendTransient { .. } => "send_transient",
            Self::SendPermanent { .. } => "send_permanent",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the queue's retry policy should get another chance at the job.
    ///
    /// Quota exhaustion is a hard stop for the tenant. Everything else that can
    /// happen during an attempt is retried up to the queue's ceiling, including
    /// permanent-looking send errors, since their shape is not reliable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::QuotaExceeded { .. } | Self::Validation(_))
    }
}
