use std::path::Path;

use hive_core::Location;

use crate::error::DistError;
use crate::transport::Transport;

use super::types::{DistConfig, NeighborConfig, ProtocolConfig};

impl DistConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, DistError> {
        Self::from_toml_with(toml_str, |key| std::env::var(key).ok())
    }

    /// Like [`DistConfig::from_toml`] with an explicit variable lookup.
    pub fn from_toml_with(
        toml_str: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DistError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DistError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Single-host node listening on its conventional IPC socket, with
    /// neighbors on theirs.
    pub fn local(node: Location, neighbors: impl IntoIterator<Item = Location>) -> Self {
        Self {
            node,
            listen: Transport::for_node(node).endpoint(),
            protocol: ProtocolConfig::default(),
            neighbors: neighbors
                .into_iter()
                .map(|location| NeighborConfig {
                    location,
                    endpoint: Transport::for_node(location).endpoint(),
                })
                .collect(),
        }
    }

    pub fn listen_transport(&self) -> Result<Transport, DistError> {
        Transport::parse(&self.listen)
    }

    pub fn neighbor_locations(&self) -> Vec<Location> {
        self.neighbors.iter().map(|n| n.location).collect()
    }

    // ── Environment variable overrides ──────────────────────────────

    /// `HIVE_DIST_SECTION_KEY` overrides `section.key`:
    /// - `HIVE_DIST_NODE` -> `node`
    /// - `HIVE_DIST_LISTEN` -> `listen`
    /// - `HIVE_DIST_PROTOCOL_THROTTLE_FACTOR` -> `protocol.throttle_factor`
    /// - `HIVE_DIST_PROTOCOL_CHUNK_SIZE` -> `protocol.chunk_size`
    /// - `HIVE_DIST_PROTOCOL_REQUEST_TIMEOUT_MS` -> `protocol.request_timeout_ms`
    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), DistError> {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T, DistError> {
            value
                .parse()
                .map_err(|_| DistError::Config(format!("{key}='{value}' is not a valid number")))
        }

        if let Some(v) = lookup("HIVE_DIST_NODE") {
            self.node = Location(parsed("HIVE_DIST_NODE", v)?);
        }
        if let Some(v) = lookup("HIVE_DIST_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("HIVE_DIST_PROTOCOL_THROTTLE_FACTOR") {
            self.protocol.throttle_factor = parsed("HIVE_DIST_PROTOCOL_THROTTLE_FACTOR", v)?;
        }
        if let Some(v) = lookup("HIVE_DIST_PROTOCOL_CHUNK_SIZE") {
            self.protocol.chunk_size = parsed("HIVE_DIST_PROTOCOL_CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("HIVE_DIST_PROTOCOL_REQUEST_TIMEOUT_MS") {
            self.protocol.request_timeout_ms = parsed("HIVE_DIST_PROTOCOL_REQUEST_TIMEOUT_MS", v)?;
        }
        Ok(())
    }
}
