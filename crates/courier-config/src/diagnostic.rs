// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Config errors as miette diagnostics.
//!
//! Figment reports where a key failed; this module points at it in the TOML
//! text that was loaded and, for misspelt keys, names the closest valid one.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a valid key needs before it is offered as a fix.
const CLOSE_ENOUGH: f64 = 0.75;

/// A TOML document that took part in loading, kept for span lookups.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub content: String,
}

impl ConfigSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(courier::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Closest valid key, if one is close enough.
        suggestion: Option<String>,
        /// Comma-separated keys accepted in the same table.
        valid_keys: String,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A key is present but its value could not be used, or a required key
    /// is absent.
    #[error("bad value at `{path}`: {detail}")]
    #[diagnostic(code(courier::config::bad_value))]
    BadValue { path: String, detail: String },

    /// The file parsed but the values break a cross-field rule.
    #[error("validation error: {message}")]
    #[diagnostic(code(courier::config::validation))]
    Validation { message: String },
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Translate every error figment collected into a diagnostic.
pub fn from_figment(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let path = error.path.join(".");
            match &error.kind {
                Kind::UnknownField(key, expected) => {
                    let (span, src) = locate(&error, key, sources).unzip();
                    ConfigError::UnknownKey {
                        key: key.clone(),
                        suggestion: suggest_key(key, expected),
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::MissingField(key) => ConfigError::BadValue {
                    path: join_path(&path, key),
                    detail: "required key is missing".to_string(),
                },
                Kind::InvalidType(actual, expected) => ConfigError::BadValue {
                    path,
                    detail: format!("found {actual}, expected {expected}"),
                },
                other => ConfigError::BadValue {
                    path,
                    detail: other.to_string(),
                },
            }
        })
        .collect()
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Span of `key` inside whichever loaded source figment blamed.
fn locate(
    error: &figment::Error,
    key: &str,
    sources: &[ConfigSource],
) -> Option<(SourceSpan, NamedSource<String>)> {
    let origin = match error.metadata.as_ref()?.source.as_ref()? {
        figment::Source::File(path) => path.display().to_string(),
        _ => return None,
    };
    let source = sources.iter().find(|s| s.name == origin)?;
    let offset = find_key_offset(&source.content, error.path.first().map(String::as_str), key)?;
    Some((
        SourceSpan::new(offset.into(), key.len()),
        NamedSource::new(&source.name, source.content.clone()),
    ))
}

/// Byte offset of `key` at the start of a line, searching after the
/// `[table]` or first `[[table]]` header when one is given.
pub fn find_key_offset(content: &str, table: Option<&str>, key: &str) -> Option<usize> {
    let start = match table {
        None => 0,
        Some(table) => {
            let array = format!("[[{table}]]");
            let plain = format!("[{table}]");
            content
                .find(&array)
                .map(|at| at + array.len())
                .or_else(|| content.find(&plain).map(|at| at + plain.len()))?
        }
    };

    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        let rest = &line[indent..];
        if rest
            .strip_prefix(key)
            .is_some_and(|after| after.starts_with([' ', '\t', '=']))
        {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}

/// The valid key most similar to `unknown`, if any clears the threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > CLOSE_ENOUGH)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Print each error to stderr with miette's graphical report.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_closest_key() {
        let valid = &["name", "log_level", "workers"];
        assert_eq!(suggest_key("wrokers", valid), Some("workers".to_string()));
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn finds_key_under_table_header() {
        let content = "[node]\nname = \"a\"\n\n[queue]\nmax_atempts = 3\n";
        let at = find_key_offset(content, Some("queue"), "max_atempts").unwrap();
        assert_eq!(&content[at..at + 11], "max_atempts");
    }

    #[test]
    fn finds_key_in_chip_entry() {
        let content = "[[chips]]\nid = \"c1\"\n  brige_url = \"http://x\"\n";
        let at = find_key_offset(content, Some("chips"), "brige_url").unwrap();
        assert_eq!(&content[at..at + 9], "brige_url");
    }

    #[test]
    fn prefix_of_longer_key_is_not_a_match() {
        let content = "[queue]\nmax_attempts_total = 3\nmax_attempts = 4\n";
        let at = find_key_offset(content, Some("queue"), "max_attempts").unwrap();
        assert_eq!(&content[at..at + 16], "max_attempts = 4");
    }

    #[test]
    fn missing_table_has_no_offset() {
        let content = "[node]\nname = \"a\"\n";
        assert_eq!(find_key_offset(content, Some("queue"), "name"), None);
    }

    #[test]
    fn bad_value_names_its_path() {
        let error = ConfigError::BadValue {
            path: "node.workers".into(),
            detail: "found string \"many\", expected u32".into(),
        };
        assert!(error.to_string().contains("node.workers"));
    }
}
