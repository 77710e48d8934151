// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`HttpBridgeClient`]: the `OutboundClient` for one bridge session.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use courier_config::ChipConfig;
use courier_core::{
    AdapterType, ClientEvent, ConnectionStatus, CourierError, HealthStatus, MessageId,
    OutboundClient, PluginAdapter,
};

use crate::wire::{
    CONNECTED_STATES, ErrorResponse, SendMediaRequest, SendResponse, SendTextRequest,
    SessionResponse,
};

/// Client for one chip's bridge session.
#[derive(Debug)]
pub struct HttpBridgeClient {
    channel_id: String,
    client: reqwest::Client,
    base_url: String,
    events: Option<mpsc::Sender<ClientEvent>>,
    last_state: Mutex<Option<ConnectionStatus>>,
}

impl HttpBridgeClient {
    /// Build a client for `chip`. `timeout` bounds every request.
    pub fn new(chip: &ChipConfig, timeout: Duration) -> Result<Self, CourierError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &chip.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                CourierError::Config(format!("invalid api_token for chip {}: {e}", chip.id))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| CourierError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            channel_id: chip.id.clone(),
            client,
            base_url: chip.bridge_url.trim_end_matches('/').to_string(),
            events: None,
            last_state: Mutex::new(None),
        })
    }

    /// Report session events (pairing challenges, status changes) on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ClientEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_send<B: Serialize>(&self, path: &str, body: &B) -> Result<MessageId, CourierError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(&self.channel_id, e))?;

        let status = response.status();
        debug!(channel_id = %self.channel_id, status = %status, path, "bridge responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let sent: SendResponse = response.json().await.map_err(|e| CourierError::SendTransient {
            message: format!("unreadable bridge response: {e}"),
            source: Some(Box::new(e)),
        })?;
        Ok(MessageId(sent.message_id))
    }

    /// Ask the bridge for its session state, forwarding any pairing
    /// challenge and state change as [`ClientEvent`]s.
    pub async fn poll_session(&self) -> Result<ConnectionStatus, CourierError> {
        let response = self
            .client
            .get(self.url("/session"))
            .send()
            .await
            .map_err(|e| request_error(&self.channel_id, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let session: SessionResponse =
            response.json().await.map_err(|e| CourierError::SendTransient {
                message: format!("unreadable session response: {e}"),
                source: Some(Box::new(e)),
            })?;

        let state = if CONNECTED_STATES.contains(&session.state.as_str()) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };

        if let Some(payload) = session.qr {
            self.emit(ClientEvent::QrChallenge {
                channel_id: self.channel_id.clone(),
                payload,
            })
            .await;
        }
        let mut last = self.last_state.lock().await;
        if *last != Some(state) {
            *last = Some(state);
            self.emit(ClientEvent::StatusChange {
                channel_id: self.channel_id.clone(),
                status: state,
            })
            .await;
        }
        Ok(state)
    }

    async fn emit(&self, event: ClientEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                debug!(channel_id = %self.channel_id, "client event receiver closed");
            }
        }
    }
}

fn request_error(channel_id: &str, e: reqwest::Error) -> CourierError {
    let message = if e.is_timeout() {
        format!("bridge request for {channel_id} timed out")
    } else if e.is_connect() {
        format!("bridge for {channel_id} unreachable")
    } else {
        format!("bridge request for {channel_id} failed: {e}")
    };
    CourierError::SendTransient {
        message,
        source: Some(Box::new(e)),
    }
}

fn status_error(status: StatusCode, body: &str) -> CourierError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|err| err.error)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("bridge returned {status}: {detail}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        CourierError::transient(message)
    } else {
        CourierError::permanent(message)
    }
}

#[async_trait]
impl PluginAdapter for HttpBridgeClient {
    fn name(&self) -> &str {
        &self.channel_id
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Outbound
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        match self.poll_session().await? {
            ConnectionStatus::Connected => Ok(HealthStatus::Healthy),
            other => Ok(HealthStatus::Unhealthy(format!("session {other}"))),
        }
    }

    async fn shutdown(&self) -> Result<(), CourierError> {
        debug!(channel_id = %self.channel_id, "bridge client released");
        Ok(())
    }
}

#[async_trait]
impl OutboundClient for HttpBridgeClient {
    async fn send_text(&self, destination: &str, text: &str) -> Result<MessageId, CourierError> {
        self.post_send(
            "/messages/text",
            &SendTextRequest {
                to: destination,
                text,
            },
        )
        .await
    }

    async fn send_media(
        &self,
        destination: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, CourierError> {
        let result = self
            .post_send(
                "/messages/media",
                &SendMediaRequest {
                    to: destination,
                    url,
                    caption,
                },
            )
            .await;
        if let Err(e) = &result {
            warn!(channel_id = %self.channel_id, error = %e, "media send failed");
        }
        result
    }
}
