// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use crate::record::ChannelKind;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_REST_URL: &str = "https://lib-backend.xrdm.app";

/// Settings read by the pipeline. Values are taken as given; only
/// [`PipelineConfig::from_env`] validates them.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL every channel path is appended to
    pub rest_url: String,
    /// Threshold and batch cap for the events, logs and telemetry channels
    pub data_entries_per_send_attempt: usize,
    /// Threshold and batch cap for the storage channel
    pub storage_entries_per_send_attempt: usize,
    /// Period of the batch timer
    pub send_next_batch_wait: Duration,
    /// Wait between attempts, and timer period after a failed flush
    pub send_retry_interval: Duration,
    /// Attempts per batch before it is requeued
    pub send_retries_on_failure: u32,
    pub request_timeout: Duration,
    /// Bound of each channel queue
    pub maximum_cached_items: usize,
    /// Minimum gap between two network attempts of one channel
    pub minimum_send_gap: Duration,
    /// Scheduler tick period
    pub tick_interval: Duration,
    /// Delay of the backup flush scheduled at shutdown
    pub shutdown_backup_delay: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.to_string(),
            data_entries_per_send_attempt: 32,
            storage_entries_per_send_attempt: 16,
            send_next_batch_wait: Duration::from_secs(30),
            send_retry_interval: Duration::from_secs(3),
            send_retries_on_failure: 3,
            request_timeout: Duration::from_secs(30),
            maximum_cached_items: 1024,
            minimum_send_gap: Duration::from_secs(1),
            tick_interval: Duration::from_millis(100),
            shutdown_backup_delay: Duration::from_secs(2),
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create configuration from `ABXR_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unset keys keep their
    /// defaults; unparsable ones are logged and keep their defaults too.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        let config = Self {
            rest_url: lookup("ABXR_REST_URL").unwrap_or(defaults.rest_url),
            data_entries_per_send_attempt: parse_or(
                &lookup,
                "ABXR_DATA_ENTRIES_PER_SEND_ATTEMPT",
                defaults.data_entries_per_send_attempt,
            )
            .unwrap_or(defaults.data_entries_per_send_attempt),
            storage_entries_per_send_attempt: parse_or(
                &lookup,
                "ABXR_STORAGE_ENTRIES_PER_SEND_ATTEMPT",
                defaults.storage_entries_per_send_attempt,
            )
            .unwrap_or(defaults.storage_entries_per_send_attempt),
            send_next_batch_wait: secs(
                "ABXR_SEND_NEXT_BATCH_WAIT_SECONDS",
                defaults.send_next_batch_wait,
            ),
            send_retry_interval: secs(
                "ABXR_SEND_RETRY_INTERVAL_SECONDS",
                defaults.send_retry_interval,
            ),
            send_retries_on_failure: parse_or(
                &lookup,
                "ABXR_SEND_RETRIES_ON_FAILURE",
                defaults.send_retries_on_failure,
            )
            .unwrap_or(defaults.send_retries_on_failure),
            request_timeout: secs("ABXR_REQUEST_TIMEOUT_SECONDS", defaults.request_timeout),
            maximum_cached_items: parse_or(
                &lookup,
                "ABXR_MAXIMUM_CACHED_ITEMS",
                defaults.maximum_cached_items,
            )
            .unwrap_or(defaults.maximum_cached_items),
            minimum_send_gap: parse_or(
                &lookup,
                "ABXR_MINIMUM_SEND_GAP_MS",
                whole_millis(defaults.minimum_send_gap),
            )
            .map_or(defaults.minimum_send_gap, Duration::from_millis),
            tick_interval: parse_or(
                &lookup,
                "ABXR_TICK_INTERVAL_MS",
                whole_millis(defaults.tick_interval),
            )
            .map_or(defaults.tick_interval, Duration::from_millis),
            shutdown_backup_delay: secs(
                "ABXR_SHUTDOWN_BACKUP_DELAY_SECONDS",
                defaults.shutdown_backup_delay,
            ),
            https_proxy: lookup("ABXR_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
            log_level: lookup("ABXR_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rest_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ABXR_REST_URL cannot be empty".to_string(),
            ));
        }

        if self.data_entries_per_send_attempt == 0 || self.storage_entries_per_send_attempt == 0 {
            return Err(ConfigError::Invalid(
                "entries per send attempt must be greater than 0".to_string(),
            ));
        }

        if self.maximum_cached_items == 0 {
            return Err(ConfigError::Invalid(
                "maximum cached items must be greater than 0".to_string(),
            ));
        }

        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick interval must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Per-channel flush threshold, also the largest batch sent in one request.
    #[must_use]
    pub fn entries_per_send_attempt(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Storage => self.storage_entries_per_send_attempt,
            _ => self.data_entries_per_send_attempt,
        }
    }

    #[must_use]
    pub fn url_for(&self, kind: ChannelKind) -> String {
        format!("{}{}", self.rest_url.trim_end_matches('/'), kind.default_path())
    }
}

/// `Some(parsed)` when the key is set and parses, `Some(default)` when it is
/// unset, `None` when it is set to garbage.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Some(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable value '{raw}' for {key}, using default");
                None
            }
        },
    }
}

/// Saturates at `u64::MAX` instead of truncating.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
