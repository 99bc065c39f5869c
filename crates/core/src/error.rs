use thiserror::Error;

use crate::ids::ContextId;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{what} capacity exhausted (capacity {capacity})")]
    CapacityExhausted { what: &'static str, capacity: usize },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("Scheduler not running: {0}")]
    NotRunning(&'static str),

    #[error("Config error: {0}")]
    Config(String),
}

impl HiveError {
    /// Build a protocol violation and log it; these indicate a broken caller.
    pub fn violation(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(violation = %msg, "scheduler protocol violation");
        HiveError::ProtocolViolation(msg)
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, HiveError::CapacityExhausted { .. })
    }
}
