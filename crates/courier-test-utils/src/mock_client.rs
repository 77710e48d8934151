// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock outbound client for deterministic testing.
//!
//! Replies are scripted per call (falling back to success once the script
//! runs out), successful sends are captured for assertions, and the health
//! probe result can be switched at any time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::{
    AdapterType, CourierError, HealthStatus, MessageId, OutboundClient, PluginAdapter,
};

/// Scripted reply for one send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Ok,
    Transient(String),
    Permanent(String),
    /// Sleep this long before succeeding (for timeout tests).
    Hang(Duration),
}

/// Scripted health probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockProbe {
    Healthy,
    Unhealthy(String),
    Error(String),
}

/// A send the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub message_id: String,
}

pub struct MockOutboundClient {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    probe: Mutex<MockProbe>,
    calls: AtomicUsize,
}

impl MockOutboundClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            probe: Mutex::new(MockProbe::Healthy),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a reply for the next unscripted send call.
    pub async fn push_reply(&self, reply: MockReply) {
        self.script.lock().await.push_back(reply);
    }

    /// Queue `count` copies of `reply`.
    pub async fn push_replies(&self, reply: MockReply, count: usize) {
        let mut script = self.script.lock().await;
        for _ in 0..count {
            script.push_back(reply.clone());
        }
    }

    pub async fn set_probe(&self, probe: MockProbe) {
        *self.probe.lock().await = probe;
    }

    /// Every send that succeeded.
    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Send calls made, successful or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(
        &self,
        destination: &str,
        text: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<MessageId, CourierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.lock().await.pop_front().unwrap_or(MockReply::Ok);
        match reply {
            MockReply::Ok => {}
            MockReply::Transient(message) => return Err(CourierError::transient(message)),
            MockReply::Permanent(message) => return Err(CourierError::permanent(message)),
            MockReply::Hang(duration) => tokio::time::sleep(duration).await,
        }
        let message_id = format!("{}-msg-{}", self.name, uuid::Uuid::new_v4());
        self.sent.lock().await.push(SentMessage {
            destination: destination.to_string(),
            text: text.map(str::to_string),
            media_url: media_url.map(str::to_string),
            message_id: message_id.clone(),
        });
        Ok(MessageId(message_id))
    }
}

#[async_trait]
impl PluginAdapter for MockOutboundClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Outbound
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        match self.probe.lock().await.clone() {
            MockProbe::Healthy => Ok(HealthStatus::Healthy),
            MockProbe::Unhealthy(reason) => Ok(HealthStatus::Unhealthy(reason)),
            MockProbe::Error(message) => Err(CourierError::transient(message)),
        }
    }

    async fn shutdown(&self) -> Result<(), CourierError> {
        Ok(())
    }
}

#[async_trait]
impl OutboundClient for MockOutboundClient {
    async fn send_text(&self, destination: &str, text: &str) -> Result<MessageId, CourierError> {
        self.respond(destination, Some(text), None).await
    }

    async fn send_media(
        &self,
        destination: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, CourierError> {
        self.respond(destination, caption, Some(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_sends_succeed_and_are_captured() {
        let client = MockOutboundClient::new("chip-a");
        let id = client.send_text("5511999990000", "hi").await.unwrap();
        assert!(id.0.starts_with("chip-a-msg-"));
        let sent = client.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn scripted_failures_are_returned_in_order() {
        let client = MockOutboundClient::new("chip-a");
        client.push_reply(MockReply::Transient("down".into())).await;
        client.push_reply(MockReply::Permanent("bad number".into())).await;

        assert!(matches!(
            client.send_text("1", "a").await,
            Err(CourierError::SendTransient { .. })
        ));
        assert!(matches!(
            client.send_media("1", "https://x/y.png", None).await,
            Err(CourierError::SendPermanent { .. })
        ));
        assert!(client.send_text("1", "c").await.is_ok());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.sent_count().await, 1);
    }

    #[tokio::test]
    async fn probe_result_is_switchable() {
        let client = MockOutboundClient::new("chip-a");
        assert_eq!(client.health_check().await.unwrap(), HealthStatus::Healthy);
        client.set_probe(MockProbe::Error("gone".into())).await;
        assert!(client.health_check().await.is_err());
    }
}
