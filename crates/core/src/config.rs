//! Environment variable parsing shared by the per-crate config loaders.
//!
//! Every setting has a default; a variable that is present but does not
//! parse is a [`ConfigError`] rather than a silent fallback.

use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Read `key` from the environment, falling back to `default` when unset.
pub fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    parse_or(key, std::env::var(key).ok(), default)
}

/// Read `key` from the environment, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional raw value, returning `default` when absent or blank.
pub fn parse_or<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}
