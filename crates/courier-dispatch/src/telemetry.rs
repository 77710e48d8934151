// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric hooks. Recorded through `courier-prometheus` when the
//! `prometheus` feature is enabled, compiled away otherwise.

#[cfg(feature = "prometheus")]
mod enabled {
    use courier_core::QueueStats;

    pub(crate) fn delivery(status: &str, channel: Option<&str>) {
        courier_prometheus::record_delivery(status, channel);
    }

    pub(crate) fn quota_denied() {
        courier_prometheus::record_quota_denial();
    }

    pub(crate) fn rate_limit_wait(channel: &str) {
        courier_prometheus::record_rate_limit_wait(channel);
    }

    pub(crate) fn dead_letter() {
        courier_prometheus::record_dead_letter();
    }

    pub(crate) fn duplicate() {
        courier_prometheus::record_duplicate();
    }

    pub(crate) fn send_latency(channel: &str, seconds: f64) {
        courier_prometheus::record_send_latency(channel, seconds);
    }

    pub(crate) fn queue_depth(stats: &QueueStats) {
        courier_prometheus::set_queue_depth(
            stats.pending,
            stats.scheduled,
            stats.in_flight,
            stats.dead,
        );
    }

    pub(crate) fn channels_connected(count: usize) {
        courier_prometheus::set_channels_connected(count);
    }
}

#[cfg(not(feature = "prometheus"))]
mod enabled {
    use courier_core::QueueStats;

    pub(crate) fn delivery(_status: &str, _channel: Option<&str>) {}
    pub(crate) fn quota_denied() {}
    pub(crate) fn rate_limit_wait(_channel: &str) {}
    pub(crate) fn dead_letter() {}
    pub(crate) fn duplicate() {}
    pub(crate) fn send_latency(_channel: &str, _seconds: f64) {}
    pub(crate) fn queue_depth(_stats: &QueueStats) {}
    pub(crate) fn channels_connected(_count: usize) {}
}

pub(crate) use enabled::*;
