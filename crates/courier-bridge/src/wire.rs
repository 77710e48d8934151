// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON bodies exchanged with the bridge sidecar.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest<'a> {
    pub to: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMediaRequest<'a> {
    pub to: &'a str,
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    pub message_id: String,
}

/// Session state as reported by `GET /session`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    pub state: String,
    /// Pairing challenge, present while the session waits to be scanned.
    #[serde(default)]
    pub qr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Session states that mean the bridge can send.
pub const CONNECTED_STATES: &[&str] = &["connected", "isLogged", "inChat"];
