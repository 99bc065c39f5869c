use std::time::Duration;

use serde::{Deserialize, Serialize};

use hive_core::Location;

use crate::take::DEFAULT_THROTTLE_FACTOR;

// ── Top-level config ────────────────────────────────────────────────

/// Configuration of one node in a distributed hive.
///
/// Parsed from a TOML file such as:
///
/// ```toml
/// node = 0
/// listen = "tcp://0.0.0.0:7400"
///
/// [protocol]
/// throttle_factor = 20
/// chunk_size = 4
///
/// [[neighbors]]
/// location = 1
/// endpoint = "tcp://10.0.0.2:7400"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistConfig {
    /// This node's id.
    pub node: Location,

    /// Endpoint the take responder binds.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Nodes this one may ask for work.
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
}

fn default_listen() -> String {
    "ipc:///tmp/hive/node-0.sock".into()
}

// ── Section configs ─────────────────────────────────────────────────

/// Take protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Exhaustions skipped between rounds, per neighbor beyond the first.
    #[serde(default = "default_throttle_factor")]
    pub throttle_factor: u32,

    /// Most tasks handed out per answered request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// A request unanswered after this long counts as a failed send.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_throttle_factor() -> u32 {
    DEFAULT_THROTTLE_FACTOR
}

fn default_chunk_size() -> u32 {
    4
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            throttle_factor: default_throttle_factor(),
            chunk_size: default_chunk_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ProtocolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A neighbor node and where its responder listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NeighborConfig {
    pub location: Location,
    pub endpoint: String,
}
