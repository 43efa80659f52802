//! Node configuration surface

use serde::{Deserialize, Serialize};
use shared::*;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("master address must not be empty")]
    EmptyMasterAddress,
    #[error("node name must not be empty")]
    EmptyNodeName,
    #[error("secret key must not be empty")]
    EmptySecretKey,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("reconnect max delay ({max_ms} ms) is below the initial delay ({initial_ms} ms)")]
    BackoffCeilingTooLow { initial_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub master_address: String,
    pub node_name: String,
    pub secret_key: String,
    pub heartbeat_interval_ms: u64,
    pub snapshot_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub connection_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub state_stale_threshold_ms: u64,
    pub compression_enabled: bool,
    pub shutdown_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            master_address: format!("127.0.0.1:{}", DEFAULT_PORT),
            node_name: String::new(),
            secret_key: String::new(),
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            snapshot_interval_ms: SNAPSHOT_INTERVAL_MS,
            metrics_interval_ms: METRICS_INTERVAL_MS,
            reconnect_initial_delay_ms: RECONNECT_INITIAL_DELAY_MS,
            reconnect_max_delay_ms: RECONNECT_MAX_DELAY_MS,
            connection_timeout_ms: CONNECTION_TIMEOUT_MS,
            auth_timeout_ms: AUTH_TIMEOUT_MS,
            state_stale_threshold_ms: STATE_STALE_THRESHOLD_MS,
            compression_enabled: true,
            shutdown_timeout_ms: SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl NodeConfig {
    pub fn new(
        master_address: impl Into<String>,
        node_name: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            master_address: master_address.into(),
            node_name: node_name.into(),
            secret_key: secret_key.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_address.is_empty() {
            return Err(ConfigError::EmptyMasterAddress);
        }
        if self.node_name.is_empty() {
            return Err(ConfigError::EmptyNodeName);
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::EmptySecretKey);
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("snapshot_interval_ms", self.snapshot_interval_ms),
            ("metrics_interval_ms", self.metrics_interval_ms),
            ("reconnect_initial_delay_ms", self.reconnect_initial_delay_ms),
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("auth_timeout_ms", self.auth_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
            return Err(ConfigError::BackoffCeilingTooLow {
                initial_ms: self.reconnect_initial_delay_ms,
                max_ms: self.reconnect_max_delay_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.snapshot_interval(), Duration::from_millis(200));
        assert_eq!(config.reconnect_initial_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay(), Duration::from_secs(30));
        assert_eq!(config.master_address, "127.0.0.1:3000");
    }

    #[test]
    fn test_identity_is_required() {
        assert_eq!(NodeConfig::default().validate(), Err(ConfigError::EmptyNodeName));
        assert_eq!(
            NodeConfig::new("127.0.0.1:3000", "lobby-1", "").validate(),
            Err(ConfigError::EmptySecretKey)
        );
        assert!(NodeConfig::new("127.0.0.1:3000", "lobby-1", "secret").validate().is_ok());
    }

    #[test]
    fn test_backoff_ceiling_below_initial() {
        let mut config = NodeConfig::new("127.0.0.1:3000", "lobby-1", "secret");
        config.reconnect_max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackoffCeilingTooLow { .. })
        ));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut config = NodeConfig::new("127.0.0.1:3000", "lobby-1", "secret");
        config.snapshot_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("snapshot_interval_ms")));
    }
}
