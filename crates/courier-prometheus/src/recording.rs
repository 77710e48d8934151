// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a
//! no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Courier metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "courier_deliveries_total",
        "Delivery attempts by outcome and channel"
    );
    describe_counter!(
        "courier_quota_denials_total",
        "Attempts rejected because the tenant quota was exhausted"
    );
    describe_counter!(
        "courier_rate_limit_waits_total",
        "Times a worker slept waiting for channel capacity"
    );
    describe_counter!(
        "courier_dead_letters_total",
        "Jobs moved to the dead letter queue"
    );
    describe_counter!(
        "courier_duplicates_total",
        "Submissions dropped by the idempotency guard"
    );
    describe_gauge!("courier_queue_depth", "Jobs in the queue by state");
    describe_gauge!("courier_channels_connected", "Chips currently connected");
    describe_gauge!("courier_memory_heap_bytes", "Allocated heap bytes");
    describe_gauge!("courier_memory_resident_bytes", "Resident memory bytes");
    describe_histogram!(
        "courier_send_latency_seconds",
        "Outbound client send latency in seconds"
    );
}

/// Record the outcome of one delivery attempt.
pub fn record_delivery(status: &str, channel: Option<&str>) {
    metrics::counter!(
        "courier_deliveries_total",
        "status" => status.to_string(),
        "channel" => channel.unwrap_or("none").to_string()
    )
    .increment(1);
}

pub fn record_quota_denial() {
    metrics::counter!("courier_quota_denials_total").increment(1);
}

/// Record a rate limiter sleep on `channel`.
pub fn record_rate_limit_wait(channel: &str) {
    metrics::counter!("courier_rate_limit_waits_total", "channel" => channel.to_string())
        .increment(1);
}

pub fn record_dead_letter() {
    metrics::counter!("courier_dead_letters_total").increment(1);
}

pub fn record_duplicate() {
    metrics::counter!("courier_duplicates_total").increment(1);
}

/// Set queue depth gauges from a stats snapshot.
pub fn set_queue_depth(pending: u64, scheduled: u64, in_flight: u64, dead: u64) {
    metrics::gauge!("courier_queue_depth", "state" => "pending").set(pending as f64);
    metrics::gauge!("courier_queue_depth", "state" => "scheduled").set(scheduled as f64);
    metrics::gauge!("courier_queue_depth", "state" => "in_flight").set(in_flight as f64);
    metrics::gauge!("courier_queue_depth", "state" => "dead").set(dead as f64);
}

pub fn set_channels_connected(count: usize) {
    metrics::gauge!("courier_channels_connected").set(count as f64);
}

/// Record how long one outbound send took.
pub fn record_send_latency(channel: &str, seconds: f64) {
    metrics::histogram!("courier_send_latency_seconds", "channel" => channel.to_string())
        .record(seconds);
}

pub fn set_memory_heap(bytes: f64) {
    metrics::gauge!("courier_memory_heap_bytes").set(bytes);
}

pub fn set_memory_resident(bytes: f64) {
    metrics::gauge!("courier_memory_resident_bytes").set(bytes);
}
