// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fire-and-forget notification bus for dispatch events.
//!
//! Built on a tokio broadcast channel: publishing never waits on
//! subscribers, and a subscriber that falls behind loses the oldest events
//! rather than slowing dispatch down.

use courier_core::ConnectionStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Something observable happened during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Delivered {
        job_id: String,
        tenant_id: String,
        channel_id: String,
        attempt: u32,
        provider_message_id: String,
    },
    AttemptFailed {
        job_id: String,
        tenant_id: String,
        channel_id: Option<String>,
        attempt: u32,
        error: String,
    },
    DeadLettered {
        job_id: String,
        tenant_id: String,
        dead_letter_id: String,
    },
    QrChallenge {
        channel_id: String,
        payload: String,
    },
    StatusChanged {
        channel_id: String,
        status: ConnectionStatus,
    },
}

impl DispatchEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::AttemptFailed { .. } => "attempt_failed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::QrChallenge { .. } => "qr_challenge",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: DispatchEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "no event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(channel: &str) -> DispatchEvent {
        DispatchEvent::StatusChanged {
            channel_id: channel.to_string(),
            status: ConnectionStatus::Connected,
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(status_event("chip-a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(status_event("chip-a"));
        assert_eq!(rx.recv().await.unwrap(), status_event("chip-a"));
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(status_event(&format!("chip-{i}")));
        }
        // The receiver lost the oldest events but sees the newest ones.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap(), status_event("chip-8"));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(DispatchEvent::DeadLettered {
            job_id: "j1".into(),
            tenant_id: "t1".into(),
            dead_letter_id: "d1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "dead_lettered");
        assert_eq!(json["job_id"], "j1");
    }
}
