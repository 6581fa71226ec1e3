//! Batch execution settings.
//!
//! Values come from defaults, then `BULKPAY_*` environment variables, then
//! command-line flags. Nothing is read from global state after construction.

use crate::domain::key::{DEFAULT_KEY_LENGTH, KeyMode, MAX_KEY_LENGTH, MIN_KEY_LENGTH};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay (delay = base * 2^(attempt-1) + jitter).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound for a single ledger call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Pause after this many submissions.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,

    #[serde(default)]
    pub key_mode: KeyMode,

    #[serde(default = "default_key_length")]
    pub key_length: usize,

    /// How long the ledger honours a key.
    #[serde(default = "default_key_validity_hours")]
    pub key_validity_hours: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            chunk_size: default_chunk_size(),
            chunk_pause_ms: default_chunk_pause_ms(),
            key_mode: KeyMode::default(),
            key_length: default_key_length(),
            key_validity_hours: default_key_validity_hours(),
        }
    }
}

impl BatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparsable values are ignored and keep their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env("MAX_ATTEMPTS") {
            config.max_attempts = v;
        }
        if let Some(v) = parse_env("BASE_DELAY_MS") {
            config.base_delay_ms = v;
        }
        if let Some(v) = parse_env("MAX_DELAY_MS") {
            config.max_delay_ms = v;
        }
        if let Some(v) = parse_env("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = v;
        }
        if let Some(v) = parse_env("CHUNK_SIZE") {
            config.chunk_size = v;
        }
        if let Some(v) = parse_env("CHUNK_PAUSE_MS") {
            config.chunk_pause_ms = v;
        }
        if let Some(mode) = get_env_with_prefix("KEY_MODE") {
            config.key_mode = match mode.to_lowercase().as_str() {
                "random" => KeyMode::Random,
                _ => KeyMode::Composite,
            };
        }
        if let Some(v) = parse_env("KEY_LENGTH") {
            config.key_length = v;
        }
        if let Some(v) = parse_env("KEY_VALIDITY_HOURS") {
            config.key_validity_hours = v;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(LedgerError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(LedgerError::ConfigError(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&self.key_length) {
            return Err(LedgerError::ConfigError(format!(
                "key_length must be within {MIN_KEY_LENGTH}..={MAX_KEY_LENGTH}"
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(LedgerError::ConfigError(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub fn key_validity(&self) -> chrono::Duration {
        chrono::Duration::hours(self.key_validity_hours as i64)
    }
}

/// Reads `BULKPAY_{key}`, falling back to `{key}`.
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("BULKPAY_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.trim().parse().ok())
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    20
}

fn default_chunk_pause_ms() -> u64 {
    1_000
}

fn default_key_length() -> usize {
    DEFAULT_KEY_LENGTH
}

fn default_key_validity_hours() -> u64 {
    24
}
