// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Courier integration tests.
//!
//! - [`MockOutboundClient`]: a scriptable outbound client that captures sends
//! - [`TestHarness`]: a dispatcher over a temp SQLite database with mock
//!   chips already provisioned and connected

pub mod harness;
pub mod mock_client;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_client::{MockOutboundClient, MockProbe, MockReply, SentMessage};
