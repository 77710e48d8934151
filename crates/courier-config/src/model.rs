// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Courier dispatch core.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Courier configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    /// Node identity, logging, and worker count.
    #[serde(default)]
    pub node: NodeConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Job queue retry and visibility settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Per-channel send throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Duplicate submission window.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Tenant quota period settings.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Dispatch worker behavior.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Channel health monitor.
    #[serde(default)]
    pub health: HealthConfig,

    /// Metrics export.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Outbound channels provisioned at startup.
    #[serde(default)]
    pub chips: Vec<ChipConfig>,
}

/// Node identity and process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Name used in logs.
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of dispatch workers to run in this process.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            log_level: default_log_level(),
            workers: default_workers(),
        }
    }
}

fn default_node_name() -> String {
    "courier".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    1
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("courier").join("courier.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("courier.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Attempts before a job is moved to the dead letter queue.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Growth factor applied per further retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single retry delay.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// How long a claimed job stays hidden before another worker may take it.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// How often idle workers poll for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_secs() -> u64 {
    3_600
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Per-channel rate limit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Sends a single channel may make within one window.
    #[serde(default = "default_ceiling_per_window")]
    pub ceiling_per_window: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Shortest sleep between admission attempts, in milliseconds.
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ceiling_per_window: default_ceiling_per_window(),
            window_secs: default_window_secs(),
            min_wait_ms: default_min_wait_ms(),
        }
    }
}

fn default_ceiling_per_window() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_min_wait_ms() -> u64 {
    1_000
}

/// Idempotency guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// How long an admitted key blocks replays.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3_600
}

/// Tenant quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Length of a quota period in days.
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
        }
    }
}

impl QuotaConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.period_days) * 86_400)
    }
}

fn default_period_days() -> u32 {
    30
}

/// Dispatch worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Hard timeout for one outbound send.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Send permanent client errors straight to the dead letter queue
    /// instead of retrying them.
    #[serde(default)]
    pub dead_letter_permanent_errors: bool,

    /// Capacity of the in-process dispatch event bus.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            dead_letter_permanent_errors: false,
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

/// Channel health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Seconds between connectivity probes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

/// Metrics export configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Install the Prometheus recorder.
    #[serde(default)]
    pub prometheus_enabled: bool,

    /// Address for the exporter's scrape endpoint (e.g. `127.0.0.1:9464`).
    /// `None` keeps the recorder in-process only.
    #[serde(default)]
    pub prometheus_listen: Option<String>,
}

/// One outbound channel served by an HTTP messaging bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChipConfig {
    /// Stable channel id.
    pub id: String,

    /// The sender identity (phone number) the channel sends as.
    pub identity: String,

    /// Base URL of the bridge session serving this chip.
    pub bridge_url: String,

    /// Bearer token sent to the bridge, if it requires one.
    #[serde(default)]
    pub api_token: Option<String>,
}
