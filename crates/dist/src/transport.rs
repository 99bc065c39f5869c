use std::path::Path;

use serde::{Deserialize, Serialize};

use hive_core::Location;

use crate::error::DistError;

const IPC_DIR: &str = "/tmp/hive";

/// Where a node's take responder listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket under `/tmp/hive/`, for nodes sharing a host.
    Ipc(String),

    /// TCP, for nodes on different hosts.
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    /// Conventional IPC socket for a node: `/tmp/hive/node-<n>.sock`.
    pub fn for_node(node: Location) -> Self {
        Self::Ipc(format!("node-{}", node.0))
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse `ipc:///tmp/hive/<name>.sock`, `ipc://<name>` or `tcp://host:port`.
    pub fn parse(endpoint: &str) -> Result<Self, DistError> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let name = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| DistError::Config(format!("ipc endpoint '{endpoint}' has no socket name")))?;
            return Ok(Self::ipc(name));
        }
        if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| DistError::Config(format!("tcp endpoint '{endpoint}' has no port")))?;
            let port = port
                .parse()
                .map_err(|_| DistError::Config(format!("tcp endpoint '{endpoint}' has a bad port")))?;
            if host.is_empty() {
                return Err(DistError::Config(format!("tcp endpoint '{endpoint}' has no host")));
            }
            return Ok(Self::tcp(host, port));
        }
        Err(DistError::Config(format!(
            "endpoint '{endpoint}' must start with ipc:// or tcp://"
        )))
    }

    /// ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    fn socket_path(&self) -> Option<String> {
        match self {
            Self::Ipc(name) => Some(format!("{IPC_DIR}/{name}.sock")),
            Self::Tcp { .. } => None,
        }
    }

    /// Create `/tmp/hive/` before binding an IPC socket. No-op for TCP.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if self.socket_path().is_some() {
            std::fs::create_dir_all(IPC_DIR)?;
        }
        Ok(())
    }

    /// Remove a socket file left behind by a node that exited uncleanly.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        let Some(path) = self.socket_path() else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path, "removed stale IPC socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_socket_naming() {
        let t = Transport::for_node(Location(2));
        assert_eq!(t.endpoint(), "ipc:///tmp/hive/node-2.sock");
    }

    #[test]
    fn parse_round_trips_endpoints() {
        for endpoint in ["tcp://127.0.0.1:7400", "ipc:///tmp/hive/node-1.sock"] {
            assert_eq!(Transport::parse(endpoint).unwrap().endpoint(), endpoint);
        }
        assert_eq!(Transport::parse("ipc://node-4").unwrap(), Transport::ipc("node-4"));
    }

    #[test]
    fn parse_rejects_malformed_endpoints() {
        for bad in ["udp://x:1", "tcp://host", "tcp://host:port", "tcp://:7400", "ipc://"] {
            assert!(Transport::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
