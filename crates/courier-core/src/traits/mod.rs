// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod outbound;
pub mod storage;

pub use adapter::PluginAdapter;
pub use outbound::OutboundClient;
pub use storage::{DispatchStore, StorageAdapter};
