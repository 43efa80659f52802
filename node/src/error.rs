use crate::config::ConfigError;
use shared::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("value encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("client is already running")]
    AlreadyStarted,
}
