// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Courier dispatch core.
//!
//! This crate provides the trait definitions, error type, and domain types
//! shared by the queue, the scheduler, the store, and the outbound clients.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::CourierError;
pub use types::{
    AdapterType, ChannelDeliveryCount, Chip, ChipFilter, ClaimedJob, ClientEvent,
    ConnectionStatus, DeadLetter, DeliveryQuery, DeliveryRecord, DeliveryStatus, HealthStatus,
    Job, JobHandle, MessageId, NackOutcome, QueueStats, QuotaCounter, QuotaReservation,
    mask_destination,
};

pub use traits::{DispatchStore, OutboundClient, PluginAdapter, StorageAdapter};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_job() -> Job {
        Job {
            job_id: "job-1".into(),
            tenant_id: "tenant-a".into(),
            destination: "5511999990000".into(),
            body_text: Some("hello".into()),
            media_url: None,
            idempotency_key: Some("order-42".into()),
            scheduled_at: None,
            attempt: 0,
        }
    }

    #[test]
    fn adapter_type_display_round_trip() {
        use std::str::FromStr;

        for variant in [
            AdapterType::Outbound,
            AdapterType::Storage,
            AdapterType::Observability,
        ] {
            let s = variant.to_string();
            let parsed = AdapterType::from_str(&s).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn connection_status_uses_snake_case() {
        use std::str::FromStr;

        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionStatus::from_str("disconnected").unwrap(),
            ConnectionStatus::Disconnected
        );
        let json = serde_json::to_string(&ConnectionStatus::Error).unwrap();
        assert_eq!(json, "\"error\"");
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn job_payload_omits_absent_fields() {
        let job = sample_job();
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("media_url"));
        assert!(!json.contains("scheduled_at"));

        // Older payloads without an attempt counter still decode.
        let parsed: Job = serde_json::from_str(
            r#"{"job_id":"j","tenant_id":"t","destination":"55119","body_text":"hi"}"#,
        )
        .unwrap();
        assert_eq!(parsed.attempt, 0);
        assert_eq!(parsed.body_text.as_deref(), Some("hi"));
    }

    #[test]
    fn dead_letter_decodes_its_payload() {
        let job = sample_job();
        let letter = DeadLetter {
            id: "dl-1".into(),
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            payload: serde_json::to_string(&job).unwrap(),
            reason: "send_transient: timeout".into(),
            attempts: 5,
            created_at: Utc::now(),
        };
        assert_eq!(letter.job().unwrap(), job);
    }

    #[test]
    fn claimed_job_final_attempt() {
        let mut job = sample_job();
        job.attempt = 4;
        let mut claimed = ClaimedJob {
            job,
            claim_token: "tok".into(),
            max_attempts: 5,
            visible_until: Utc::now(),
        };
        assert!(!claimed.is_final_attempt());
        claimed.job.attempt = 5;
        assert!(claimed.is_final_attempt());
    }

    #[test]
    fn quota_counter_remaining() {
        let mut quota = QuotaCounter {
            tenant_id: "t".into(),
            sent_this_period: 3,
            limit: 5,
            period_reset_at: Utc::now(),
        };
        assert_eq!(quota.remaining(), Some(2));
        quota.limit = QuotaCounter::UNLIMITED;
        assert!(quota.is_unlimited());
        assert_eq!(quota.remaining(), None);
    }

    #[test]
    fn chip_reputation_is_success_minus_failure() {
        let now = Utc::now();
        let chip = Chip {
            channel_id: "chip-1".into(),
            destination_identity: "5511000000001".into(),
            status: ConnectionStatus::Connected,
            active: true,
            last_used_at: None,
            success_count: 12,
            failure_count: 2,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(chip.reputation(), 10);
    }

    #[test]
    fn error_retryability() {
        assert!(!CourierError::QuotaExceeded {
            tenant_id: "t".into()
        }
        .is_retryable());
        assert!(CourierError::NoChannelAvailable.is_retryable());
        assert!(CourierError::permanent("invalid destination").is_retryable());
        assert_eq!(CourierError::transient("x").kind(), "send_transient");
    }

    #[test]
    fn destination_masking_keeps_six_chars() {
        assert_eq!(mask_destination("5511999990000"), "551199...");
        assert_eq!(mask_destination("123"), "123...");
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_outbound_client<T: OutboundClient>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
        fn _assert_dispatch_store<T: DispatchStore>() {}
    }
}
