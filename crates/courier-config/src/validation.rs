// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as positive intervals, known log levels, and unique chip ids.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::CourierConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CourierConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.node.log_level.to_ascii_lowercase().as_str()) {
        fail(format!(
            "node.log_level `{}` must be one of: {}",
            config.node.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.node.workers == 0 {
        fail("node.workers must be at least 1".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        fail("queue.max_attempts must be at least 1".to_string());
    }
    if queue.backoff_multiplier < 1.0 || !queue.backoff_multiplier.is_finite() {
        fail(format!(
            "queue.backoff_multiplier must be a finite number >= 1.0, got {}",
            queue.backoff_multiplier
        ));
    }
    if queue.backoff_max_secs.saturating_mul(1_000) < queue.backoff_base_ms {
        fail(format!(
            "queue.backoff_max_secs ({}s) must not be below queue.backoff_base_ms ({}ms)",
            queue.backoff_max_secs, queue.backoff_base_ms
        ));
    }
    if queue.visibility_timeout_secs == 0 {
        fail("queue.visibility_timeout_secs must be positive".to_string());
    }
    if queue.poll_interval_ms == 0 {
        fail("queue.poll_interval_ms must be positive".to_string());
    }

    if config.rate_limit.ceiling_per_window == 0 {
        fail("rate_limit.ceiling_per_window must be at least 1".to_string());
    }
    if config.rate_limit.window_secs == 0 {
        fail("rate_limit.window_secs must be positive".to_string());
    }

    if config.idempotency.ttl_secs == 0 {
        fail("idempotency.ttl_secs must be positive".to_string());
    }

    if config.quota.period_days == 0 {
        fail("quota.period_days must be at least 1".to_string());
    }

    if config.dispatch.send_timeout_secs == 0 {
        fail("dispatch.send_timeout_secs must be positive".to_string());
    }
    if queue.visibility_timeout_secs > 0
        && queue.visibility_timeout_secs <= config.dispatch.send_timeout_secs
    {
        fail(format!(
            "queue.visibility_timeout_secs ({}s) must exceed dispatch.send_timeout_secs ({}s) \
             so a claim outlives the send it guards",
            queue.visibility_timeout_secs, config.dispatch.send_timeout_secs
        ));
    }
    if config.dispatch.event_buffer == 0 {
        fail("dispatch.event_buffer must be at least 1".to_string());
    }

    if config.health.interval_secs == 0 {
        fail("health.interval_secs must be positive".to_string());
    }

    if let Some(listen) = &config.telemetry.prometheus_listen
        && listen.parse::<std::net::SocketAddr>().is_err()
    {
        fail(format!(
            "telemetry.prometheus_listen `{listen}` is not a valid socket address"
        ));
    }

    let mut seen_ids = HashSet::new();
    for (i, chip) in config.chips.iter().enumerate() {
        if chip.id.trim().is_empty() {
            fail(format!("chips[{i}].id must not be empty"));
        } else if !seen_ids.insert(chip.id.as_str()) {
            fail(format!("duplicate chip id `{}` in [[chips]] array", chip.id));
        }
        if chip.identity.trim().is_empty() {
            fail(format!("chips[{i}].identity must not be empty"));
        }
        if !(chip.bridge_url.starts_with("http://") || chip.bridge_url.starts_with("https://")) {
            fail(format!(
                "chips[{i}].bridge_url `{}` must be an http(s) URL",
                chip.bridge_url
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChipConfig;

    fn chip(id: &str) -> ChipConfig {
        ChipConfig {
            id: id.to_string(),
            identity: "5511000000001".to_string(),
            bridge_url: "http://127.0.0.1:3001".to_string(),
            api_token: None,
        }
    }

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = CourierConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = CourierConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "database_path"));
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut config = CourierConfig::default();
        config.node.workers = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "node.workers"));
    }

    #[test]
    fn unknown_log_level_fails_validation() {
        let mut config = CourierConfig::default();
        config.node.log_level = "verbose".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "node.log_level"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = CourierConfig::default();
        config.queue.max_attempts = 0;
        config.rate_limit.ceiling_per_window = 0;
        config.quota.period_days = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn backoff_multiplier_below_one_fails() {
        let mut config = CourierConfig::default();
        config.queue.backoff_multiplier = 0.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "backoff_multiplier"));
    }

    #[test]
    fn visibility_must_outlast_send_timeout() {
        let mut config = CourierConfig::default();
        config.queue.visibility_timeout_secs = 30;
        config.dispatch.send_timeout_secs = 30;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "must exceed dispatch.send_timeout_secs"));

        config.queue.visibility_timeout_secs = 31;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn bad_prometheus_listen_fails() {
        let mut config = CourierConfig::default();
        config.telemetry.prometheus_listen = Some("not-an-addr".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "prometheus_listen"));
    }

    #[test]
    fn duplicate_chip_ids_fail_validation() {
        let mut config = CourierConfig::default();
        config.chips = vec![chip("chip-a"), chip("chip-a")];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "duplicate chip id"));
    }

    #[test]
    fn chip_bridge_url_must_be_http() {
        let mut config = CourierConfig::default();
        let mut bad = chip("chip-a");
        bad.bridge_url = "ftp://example".to_string();
        config.chips = vec![bad];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "bridge_url"));
    }

    #[test]
    fn chips_deny_unknown_fields() {
        let toml_str = r#"
[[chips]]
id = "chip-a"
identity = "5511000000001"
bridge_url = "http://localhost:3001"
colour = "blue"
"#;
        assert!(toml::from_str::<CourierConfig>(toml_str).is_err());
    }
}
