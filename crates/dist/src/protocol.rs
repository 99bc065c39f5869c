//! Take request/response payloads exchanged between nodes.

use serde::{Deserialize, Serialize};

use hive_core::{Location, TaskHandle};

/// A starving node asking a neighbor for work.
pub const TAKE_REQUEST: &str = "hive.take.request";

/// A neighbor's answer: zero or more tasks it no longer owns.
pub const TAKE_RESPONSE: &str = "hive.take.response";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeRequest {
    pub requester: Location,
    /// Upper bound on tasks the requester wants back.
    pub max_tasks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeResponse {
    pub responder: Location,
    pub tasks: Vec<TaskHandle>,
    /// The responder is going down and will not serve further requests.
    #[serde(default)]
    pub shutting_down: bool,
}

impl TakeResponse {
    pub fn empty(responder: Location) -> Self {
        Self {
            responder,
            tasks: Vec::new(),
            shutting_down: false,
        }
    }

    pub fn closing(responder: Location) -> Self {
        Self {
            shutting_down: true,
            ..Self::empty(responder)
        }
    }
}
