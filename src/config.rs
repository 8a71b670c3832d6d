//! Process configuration
//!
//! Everything is read from the environment once at startup.

use crate::relay::RelaySettings;
use crate::upstream::RetryPolicy;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

pub const ENV_UPSTREAM_BASE_URL: &str = "SCRUD_API_BASE_URL";
pub const ENV_PORT: &str = "SCRUD_RELAY_PORT";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "SCRUD_RELAY_IDLE_TIMEOUT_SECS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "SCRUD_RELAY_CONNECT_TIMEOUT_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "SCRUD_RELAY_MAX_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "SCRUD_RELAY_RETRY_BACKOFF_MS";
pub const ENV_CHANNEL_CAPACITY: &str = "SCRUD_RELAY_CHANNEL_CAPACITY";
pub const ENV_MAX_LINE_BYTES: &str = "SCRUD_RELAY_MAX_LINE_BYTES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SCRUD_API_BASE_URL is not set")]
    MissingUpstream,
    #[error("SCRUD_API_BASE_URL is not a usable base URL: {0}")]
    InvalidUpstream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub upstream_base_url: Url,
    pub port: u16,
    pub connect_timeout: Duration,
    pub relay: RelaySettings,
    pub retry: RetryPolicy,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = lookup(ENV_UPSTREAM_BASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingUpstream)?;
        let upstream_base_url =
            Url::parse(raw_url.trim()).map_err(|e| ConfigError::InvalidUpstream(e.to_string()))?;
        if upstream_base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUpstream(raw_url));
        }

        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let relay_defaults = RelaySettings::default();
        let retry_defaults = RetryPolicy::default();

        let port = lookup(ENV_PORT)
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(8000);

        Ok(Self {
            upstream_base_url,
            port,
            connect_timeout: parsed(ENV_CONNECT_TIMEOUT_SECS)
                .map_or(Duration::from_secs(10), Duration::from_secs),
            relay: RelaySettings {
                idle_timeout: parsed(ENV_IDLE_TIMEOUT_SECS)
                    .filter(|secs| *secs > 0)
                    .map_or(relay_defaults.idle_timeout, Duration::from_secs),
                channel_capacity: parsed(ENV_CHANNEL_CAPACITY)
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(relay_defaults.channel_capacity),
                max_line_len: parsed(ENV_MAX_LINE_BYTES)
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(relay_defaults.max_line_len),
            },
            retry: RetryPolicy {
                max_attempts: parsed(ENV_MAX_ATTEMPTS)
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(retry_defaults.max_attempts),
                initial_backoff: parsed(ENV_RETRY_BACKOFF_MS)
                    .map_or(retry_defaults.initial_backoff, Duration::from_millis),
                max_backoff: retry_defaults.max_backoff,
            },
        })
    }
}
