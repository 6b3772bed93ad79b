//! Runtime configuration for the notification gateway.

use std::time::Duration;
use thiserror::Error;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REDIS_PREFIX: &str = "prints:";

/// Error produced when configuration values cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Settings shared by every session the gateway opens.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on a single frame write to a client. A client that cannot
    /// take a frame within this window is disconnected.
    pub write_timeout: Duration,
    /// Redis server used by the relay, if any. Only read with the
    /// `redis-relay` feature.
    pub redis_url: Option<String>,
    /// Prefix for relay channel names, e.g. `prints:secretary`.
    pub redis_channel_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            redis_url: None,
            redis_channel_prefix: DEFAULT_REDIS_PREFIX.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Reads the configuration from environment variables, falling back to
    /// defaults for anything unset:
    ///
    /// * `PRINTS_WRITE_TIMEOUT_MS` - positive integer, milliseconds
    /// * `REDIS_URL`
    /// * `PRINTS_REDIS_PREFIX`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("PRINTS_WRITE_TIMEOUT_MS") {
            config.write_timeout =
                Duration::from_millis(parse_positive("PRINTS_WRITE_TIMEOUT_MS", &raw)?);
        }
        config.redis_url = lookup("REDIS_URL").filter(|url| !url.trim().is_empty());
        if let Some(prefix) = lookup("PRINTS_REDIS_PREFIX") {
            config.redis_channel_prefix = prefix;
        }

        Ok(config)
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = GatewayConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.redis_channel_prefix, "prints:");
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("PRINTS_WRITE_TIMEOUT_MS", "250"),
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("PRINTS_REDIS_PREFIX", "school:"),
        ]))
        .unwrap();
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.redis_channel_prefix, "school:");
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("PRINTS_WRITE_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PRINTS_WRITE_TIMEOUT_MS",
                value: "0".into()
            }
        );
        assert!(
            GatewayConfig::from_lookup(lookup_from(&[("PRINTS_WRITE_TIMEOUT_MS", "soon")]))
                .is_err()
        );
    }

    #[test]
    fn blank_redis_url_means_no_relay() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("REDIS_URL", "  ")])).unwrap();
        assert_eq!(config.redis_url, None);
    }
}
