// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound client trait: the opaque capability that actually talks to the
//! messaging network on behalf of one channel.

use async_trait::async_trait;

use crate::error::CourierError;
use crate::traits::adapter::PluginAdapter;
use crate::types::MessageId;

/// A live, stateful session for one outbound channel.
///
/// Implementations report failures as [`CourierError::SendTransient`] or
/// [`CourierError::SendPermanent`]. Connectivity is probed through
/// [`PluginAdapter::health_check`]; asynchronous session events are pushed as
/// [`crate::types::ClientEvent`]s through a sender handed to the client when
/// it is provisioned.
#[async_trait]
pub trait OutboundClient: PluginAdapter {
    /// Sends a plain text message.
    async fn send_text(&self, destination: &str, text: &str) -> Result<MessageId, CourierError>;

    /// Sends a media message referenced by URL, with an optional caption.
    async fn send_media(
        &self,
        destination: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, CourierError>;
}
