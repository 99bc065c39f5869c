use std::collections::HashSet;

use super::types::DistConfig;
use crate::error::DistError;
use crate::transport::Transport;

impl DistConfig {
    /// Check neighbors, endpoints and protocol tuning.
    pub fn validate(&self) -> Result<(), DistError> {
        self.validate_protocol()?;
        self.validate_neighbors()?;
        Transport::parse(&self.listen)?;
        Ok(())
    }

    fn validate_protocol(&self) -> Result<(), DistError> {
        if self.protocol.chunk_size == 0 {
            return Err(DistError::Config("protocol.chunk_size must be at least 1".into()));
        }
        if self.protocol.request_timeout_ms == 0 {
            return Err(DistError::Config(
                "protocol.request_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Neighbors are unique, parse, and never name this node.
    fn validate_neighbors(&self) -> Result<(), DistError> {
        let mut seen = HashSet::new();
        for neighbor in &self.neighbors {
            if neighbor.location == self.node {
                return Err(DistError::Config(format!(
                    "node {} lists itself as a neighbor",
                    self.node
                )));
            }
            if !seen.insert(neighbor.location) {
                return Err(DistError::Config(format!(
                    "neighbor {} is listed twice",
                    neighbor.location
                )));
            }
            Transport::parse(&neighbor.endpoint)?;
        }
        Ok(())
    }
}
