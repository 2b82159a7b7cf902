pub mod loader;

pub use loader::ConfigLoader;

use gatesync_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:8787/ws";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// One configuration layer as read from a file. Every field is optional so
/// layers can be merged, later layers winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn merge(&mut self, other: Config) {
        merge_option_replace(&mut self.gateway_url, other.gateway_url);
        merge_option_replace(&mut self.heartbeat_interval_ms, other.heartbeat_interval_ms);
        merge_option_replace(&mut self.reconnect_delay_ms, other.reconnect_delay_ms);
        merge_option_replace(&mut self.log_level, other.log_level);
        merge_option_replace(&mut self.log_dir, other.log_dir);
    }

    /// Applies defaults and validates the merged layers.
    pub fn resolve(&self) -> Result<ClientConfig, ConfigError> {
        let gateway_url = self
            .gateway_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        validate_gateway_url(&gateway_url)?;

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("heartbeatIntervalMs"));
        }
        let reconnect_delay_ms = self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if reconnect_delay_ms == 0 {
            return Err(ConfigError::ZeroInterval("reconnectDelayMs"));
        }

        let log_level = match self.log_level.as_deref() {
            Some(name) => LogLevel::parse(name)
                .ok_or_else(|| ConfigError::InvalidLogLevel(name.to_string()))?,
            None => LogLevel::Info,
        };

        Ok(ClientConfig {
            gateway_url,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            log_level,
            log_dir: self.log_dir.clone(),
        })
    }
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            log_level: LogLevel::Info,
            log_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid gateway url `{url}`: {reason}")]
    InvalidGatewayUrl { url: String, reason: String },

    #[error("`{0}` must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("unknown log level `{0}`")]
    InvalidLogLevel(String),
}

fn validate_gateway_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|err| ConfigError::InvalidGatewayUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidGatewayUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{}`", other),
        }),
    }
}

fn merge_option_replace<T>(target: &mut Option<T>, source: Option<T>) {
    if source.is_some() {
        *target = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let resolved = Config::default().resolve().unwrap();
        assert_eq!(resolved, ClientConfig::default());
        assert_eq!(resolved.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(resolved.reconnect_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_merge_later_layer_wins_only_where_set() {
        let mut base = Config {
            gateway_url: Some("ws://a/ws".to_string()),
            reconnect_delay_ms: Some(500),
            ..Config::default()
        };
        base.merge(Config {
            gateway_url: Some("wss://b/ws".to_string()),
            log_level: Some("debug".to_string()),
            ..Config::default()
        });

        assert_eq!(base.gateway_url.as_deref(), Some("wss://b/ws"));
        assert_eq!(base.reconnect_delay_ms, Some(500));
        assert_eq!(base.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_rejects_http_url() {
        let config = Config {
            gateway_url: Some("http://localhost:8787".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidGatewayUrl { .. })
        ));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let config = Config {
            gateway_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let config = Config {
            heartbeat_interval_ms: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::ZeroInterval("heartbeatIntervalMs"))
        ));

        let config = Config {
            reconnect_delay_ms: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::ZeroInterval("reconnectDelayMs"))
        ));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let config = Config {
            log_level: Some("chatty".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
