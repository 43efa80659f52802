//! Master configuration surface

use serde::{Deserialize, Serialize};
use shared::*;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one secret key must be configured")]
    NoSecretKeys,
    #[error("secret keys must not be empty")]
    EmptySecretKey,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("heartbeat timeout ({timeout_ms} ms) must exceed the broadcast interval ({interval_ms} ms)")]
    TimeoutBelowInterval { timeout_ms: u64, interval_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
    pub secret_keys: Vec<String>,
    pub broadcast_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub rate_limit_burst: u32,
    pub rate_limit_refill_per_second: u32,
    pub compression_enabled: bool,
    pub shutdown_timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            secret_keys: Vec::new(),
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            auth_timeout_ms: AUTH_TIMEOUT_MS,
            rate_limit_burst: RATE_LIMIT_BURST,
            rate_limit_refill_per_second: RATE_LIMIT_PER_SECOND,
            compression_enabled: true,
            shutdown_timeout_ms: SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl MasterConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret_keys: vec![secret.into()],
            ..Self::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Advertised snapshot lifetime: two broadcast intervals, in whole seconds.
    pub fn state_ttl_seconds(&self) -> u32 {
        (self.broadcast_interval_ms / 1000 * 2) as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_keys.is_empty() {
            return Err(ConfigError::NoSecretKeys);
        }
        if self.secret_keys.iter().any(|key| key.is_empty()) {
            return Err(ConfigError::EmptySecretKey);
        }
        for (name, value) in [
            ("broadcast_interval_ms", self.broadcast_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("auth_timeout_ms", self.auth_timeout_ms),
            ("rate_limit_burst", u64::from(self.rate_limit_burst)),
            ("rate_limit_refill_per_second", u64::from(self.rate_limit_refill_per_second)),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        if self.heartbeat_timeout_ms <= self.broadcast_interval_ms {
            return Err(ConfigError::TimeoutBelowInterval {
                timeout_ms: self.heartbeat_timeout_ms,
                interval_ms: self.broadcast_interval_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = MasterConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.broadcast_interval(), Duration::from_millis(500));
        assert_eq!(config.rate_limit_burst, 200);
        assert_eq!(config.rate_limit_refill_per_second, 100);
        assert!(config.compression_enabled);
    }

    #[test]
    fn test_missing_secret_is_invalid() {
        assert_eq!(MasterConfig::default().validate(), Err(ConfigError::NoSecretKeys));
        assert!(MasterConfig::with_secret("k").validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_invalid() {
        let mut config = MasterConfig::with_secret("k");
        config.rate_limit_burst = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("rate_limit_burst")));
    }

    #[test]
    fn test_timeout_must_exceed_interval() {
        let mut config = MasterConfig::with_secret("k");
        config.heartbeat_timeout_ms = 400;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TimeoutBelowInterval { .. })
        ));
    }

    #[test]
    fn test_ttl_is_two_intervals_in_seconds() {
        let mut config = MasterConfig::with_secret("k");
        assert_eq!(config.state_ttl_seconds(), 0);
        config.broadcast_interval_ms = 2_000;
        assert_eq!(config.state_ttl_seconds(), 4);
    }
}
