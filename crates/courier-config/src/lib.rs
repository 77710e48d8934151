// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Courier dispatch core.
//!
//! TOML files (`deny_unknown_fields`) are layered over compiled defaults,
//! then `COURIER_*` environment variables on top. Every entry point here
//! runs semantic validation as well and returns all problems at once as
//! miette diagnostics.
//!
//! ```no_run
//! let config = courier_config::load_and_validate().unwrap_or_else(|errors| {
//!     courier_config::render_errors(&errors);
//!     std::process::exit(2);
//! });
//! println!("workers: {}", config.node.workers);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, ConfigSource, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{ChipConfig, CourierConfig};

/// Load from the file hierarchy plus environment, then validate.
pub fn load_and_validate() -> Result<CourierConfig, Vec<ConfigError>> {
    checked(loader::load_config(), || {
        loader::search_paths()
            .into_iter()
            .filter_map(|path| read_source(&absolute(&path)))
            .collect()
    })
}

/// Load one explicit file plus environment, then validate.
pub fn load_and_validate_path(path: &Path) -> Result<CourierConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        read_source(&absolute(path)).into_iter().collect()
    })
}

/// Load an inline TOML document, then validate.
pub fn load_and_validate_str(toml: &str) -> Result<CourierConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml), || {
        vec![ConfigSource::new("<inline>", toml)]
    })
}

/// Validate a loaded config, or turn the load error into diagnostics. The
/// sources are only read when there is an error to point into.
fn checked(
    loaded: Result<CourierConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<ConfigSource>,
) -> Result<CourierConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::from_figment(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Figment names file sources by absolute path.
fn absolute(path: &Path) -> std::path::PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_source(path: &Path) -> Option<ConfigSource> {
    let content = std::fs::read_to_string(path).ok()?;
    Some(ConfigSource::new(path.display().to_string(), content))
}
