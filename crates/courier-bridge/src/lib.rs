// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound client that drives a messaging-gateway sidecar over HTTP.
//!
//! Each chip is served by one bridge session exposing:
//!
//! - `POST {base}/messages/text`  `{"to", "text"}` → `{"message_id"}`
//! - `POST {base}/messages/media` `{"to", "url", "caption"?}` → `{"message_id"}`
//! - `GET  {base}/session` → `{"state", "qr"?}`
//!
//! Network failures, timeouts, `408`, `429`, and `5xx` responses are
//! transient; any other non-success status is permanent.

pub mod client;
pub mod wire;

pub use client::HttpBridgeClient;
