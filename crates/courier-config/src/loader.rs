// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./courier.toml` > `~/.config/courier/courier.toml` > `/etc/courier/courier.toml`
//! with environment variable overrides via `COURIER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CourierConfig;

/// Top-level sections reachable through `COURIER_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: &[&str] = &[
    "node",
    "storage",
    "queue",
    "rate_limit",
    "idempotency",
    "quota",
    "dispatch",
    "health",
    "telemetry",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/courier/courier.toml` (system-wide)
/// 3. `~/.config/courier/courier.toml` (user XDG config)
/// 4. `./courier.toml` (local directory)
/// 5. `COURIER_*` environment variables
pub fn load_config() -> Result<CourierConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<CourierConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CourierConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    search_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(CourierConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Config files in merge order, lowest precedence first. Missing files are
/// skipped by figment.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/courier/courier.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("courier/courier.toml"));
    }
    paths.push(PathBuf::from("courier.toml"));
    paths
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because both section and key
/// names contain underscores: `COURIER_RATE_LIMIT_WINDOW_SECS` must map to
/// `rate_limit.window_secs`.
fn env_provider() -> Env {
    Env::prefixed("COURIER_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env var name to its dotted config path.
pub fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("node_log_level"), "node.log_level");
        assert_eq!(
            map_env_key("rate_limit_ceiling_per_window"),
            "rate_limit.ceiling_per_window"
        );
        assert_eq!(
            map_env_key("dispatch_dead_letter_permanent_errors"),
            "dispatch.dead_letter_permanent_errors"
        );
        assert_eq!(map_env_key("queue_max_attempts"), "queue.max_attempts");
    }

    #[test]
    fn unknown_env_keys_pass_through() {
        assert_eq!(map_env_key("bogus"), "bogus");
    }

    #[test]
    fn local_file_has_highest_precedence() {
        let paths = search_paths();
        assert_eq!(paths.first(), Some(&PathBuf::from("/etc/courier/courier.toml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("courier.toml")));
    }
}
