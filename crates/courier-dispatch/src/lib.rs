// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatch core for Courier.
//!
//! Tenants submit sends through a [`Producer`]; jobs land in a durable
//! [`JobQueue`]; a [`WorkerPool`] of [`DispatchWorker`]s claims them, charges
//! the tenant's [`QuotaReservoir`], picks a channel through the
//! [`ChannelSelector`], waits on the channel's [`RateLimiter`], and sends.
//! Every attempt leaves an immutable delivery record and an event on the
//! [`EventBus`].

pub mod dispatcher;
pub mod events;
pub mod health;
pub mod idempotency;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod quota;
pub mod rate_limit;
pub mod registry;
pub mod selector;
pub mod shutdown;
mod telemetry;
pub mod worker;

pub use dispatcher::{Dispatcher, WorkerSettings};
pub use events::{DispatchEvent, EventBus};
pub use health::{HealthMonitor, ProbeReport};
pub use idempotency::IdempotencyGuard;
pub use pool::WorkerPool;
pub use producer::{MAX_BATCH, Producer, SendRequest, SubmitOutcome, normalize_destination};
pub use queue::{JobQueue, RetryPolicy};
pub use quota::QuotaReservoir;
pub use rate_limit::{Admission, RateLimiter};
pub use registry::{ChipRegistry, ClientHandles};
pub use selector::{ChannelSelector, Selection};
pub use shutdown::install_signal_handler;
pub use worker::{AttemptOutcome, DispatchWorker};
