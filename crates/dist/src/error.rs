use hive_core::{HiveError, Location};
use thiserror::Error;

/// Errors that can occur in the distributed scheduling layer.
#[derive(Debug, Error)]
pub enum DistError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("neighbor {0} is unreachable")]
    Unreachable(Location),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] HiveError),
}

impl DistError {
    /// Whether the peer should be treated as gone rather than slow.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DistError::Unreachable(_) | DistError::Zmq(_))
    }
}
