use std::{net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{directions::DEFAULT_DIRECTIONS_URL, fanout::FanOutLimits, heatmap::HeatmapSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub directions_api_key: Option<String>,
    pub directions_url: String,
    pub directions_timeout: Duration,
    pub limits: FanOutLimits,
    pub heatmap: HeatmapSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            directions_api_key: None,
            directions_url: DEFAULT_DIRECTIONS_URL.to_string(),
            directions_timeout: Duration::from_millis(5000),
            limits: FanOutLimits::default(),
            heatmap: HeatmapSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &'static str, default: Duration| {
            parse_or(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };

        let directions_api_key = lookup("DIRECTIONS_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let limits = FanOutLimits {
            concurrency: parse_or(&lookup, "ESTIMATE_CONCURRENCY", defaults.limits.concurrency)?,
            per_call_timeout: millis("ESTIMATE_TIMEOUT_MS", defaults.limits.per_call_timeout)?,
            deadline: millis("PIPELINE_DEADLINE_MS", defaults.limits.deadline)?,
        };
        if limits.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "ESTIMATE_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let heatmap = HeatmapSettings {
            max_grid_size: parse_or(
                &lookup,
                "HEATMAP_MAX_GRID_SIZE",
                defaults.heatmap.max_grid_size,
            )?,
            cache_capacity: parse_or(
                &lookup,
                "HEATMAP_CACHE_CAPACITY",
                defaults.heatmap.cache_capacity,
            )?,
            cache_ttl: parse_or(
                &lookup,
                "HEATMAP_CACHE_TTL_SECS",
                defaults.heatmap.cache_ttl.as_secs(),
            )
            .map(Duration::from_secs)?,
        };

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            directions_api_key,
            directions_url: lookup("DIRECTIONS_URL").unwrap_or(defaults.directions_url),
            directions_timeout: millis("DIRECTIONS_TIMEOUT_MS", defaults.directions_timeout)?,
            limits,
            heatmap,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(config.directions_api_key.is_none());
        assert_eq!(config.directions_url, DEFAULT_DIRECTIONS_URL);
        assert_eq!(config.limits.concurrency, 16);
        assert_eq!(config.limits.per_call_timeout, Duration::from_millis(250));
        assert_eq!(config.heatmap.max_grid_size, 100);
        assert_eq!(config.heatmap.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("BIND_ADDR", "127.0.0.1:3000"),
            ("DIRECTIONS_API_KEY", " secret "),
            ("ESTIMATE_CONCURRENCY", "4"),
            ("PIPELINE_DEADLINE_MS", "1500"),
            ("HEATMAP_CACHE_CAPACITY", "0"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.directions_api_key.as_deref(), Some("secret"));
        assert_eq!(config.limits.concurrency, 4);
        assert_eq!(config.limits.deadline, Duration::from_millis(1500));
        assert_eq!(config.heatmap.cache_capacity, 0);
    }

    #[test]
    fn blank_api_key_is_unset() {
        let config = config(&[("DIRECTIONS_API_KEY", "  ")]).unwrap();
        assert!(config.directions_api_key.is_none());
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = config(&[("ESTIMATE_TIMEOUT_MS", "fast")]).unwrap_err();
        assert!(err.to_string().contains("ESTIMATE_TIMEOUT_MS"));
        assert!(config(&[("ESTIMATE_CONCURRENCY", "0")]).is_err());
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
    }
}
