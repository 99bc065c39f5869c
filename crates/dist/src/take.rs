//! Self-throttling take protocol between nodes.
//!
//! [`TakeProtocol`] is a plain state machine: it decides which neighbors
//! to ask for work and tracks their status, while the caller does the
//! sending (see [`crate::node::DistributedScheduler`]).

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use hive_core::{Location, TaskHandle};

use crate::protocol::TakeResponse;

pub const DEFAULT_THROTTLE_FACTOR: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborStatus {
    Idle,
    /// A take request is outstanding.
    Requested,
}

#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    pub location: Location,
    pub status: NeighborStatus,
    pub can_accept_requests: bool,
    pub requests_sent: u64,
    pub tasks_received: u64,
    pub failures: u64,
}

impl Neighbor {
    fn new(location: Location) -> Self {
        Self {
            location,
            status: NeighborStatus::Idle,
            can_accept_requests: true,
            requests_sent: 0,
            tasks_received: 0,
            failures: 0,
        }
    }

    fn selectable(&self, requester: Option<Location>) -> bool {
        self.status == NeighborStatus::Idle
            && self.can_accept_requests
            && Some(self.location) != requester
    }
}

#[derive(Debug)]
pub struct TakeProtocol {
    neighbors: Vec<Neighbor>,
    next_victim: usize,
    throttle: i64,
    throttle_factor: u32,
}

impl TakeProtocol {
    pub fn new(neighbors: impl IntoIterator<Item = Location>, throttle_factor: u32) -> Self {
        let mut seen = HashSet::new();
        let neighbors: Vec<Neighbor> = neighbors
            .into_iter()
            .filter(|loc| seen.insert(*loc))
            .map(Neighbor::new)
            .collect();
        Self {
            neighbors,
            next_victim: 0,
            // The first exhaustion always triggers a round.
            throttle: 1,
            throttle_factor,
        }
    }

    fn reset_value(&self) -> i64 {
        i64::from(self.throttle_factor) * (self.neighbors.len() as i64 - 1)
    }

    fn neighbor_mut(&mut self, location: Location) -> Option<&mut Neighbor> {
        self.neighbors.iter_mut().find(|n| n.location == location)
    }

    /// The local node ran out of work. Returns the neighbors to send a take
    /// request to, each now `Requested`; empty while throttled.
    ///
    /// `requester` is the node whose own request caused the exhaustion and
    /// is never asked back.
    pub fn on_local_exhaustion(&mut self, requester: Option<Location>) -> Vec<Location> {
        self.throttle -= 1;
        if self.throttle > 0 {
            return Vec::new();
        }
        self.throttle = self.reset_value();

        let count = self.neighbors.len();
        if count == 0 {
            return Vec::new();
        }
        let start = self.next_victim % count;
        self.next_victim = (self.next_victim + 1) % count;

        let mut selected = Vec::new();
        for i in 0..count {
            let neighbor = &mut self.neighbors[(start + i) % count];
            if neighbor.selectable(requester) {
                neighbor.status = NeighborStatus::Requested;
                neighbor.requests_sent += 1;
                selected.push(neighbor.location);
            }
        }
        debug!(?requester, selected = selected.len(), throttle = self.throttle, "take round");
        selected
    }

    /// A neighbor answered. Its tasks are handed back even when the answer
    /// was not expected, since the neighbor no longer owns them.
    pub fn on_response(&mut self, from: Location, response: &TakeResponse) -> Vec<TaskHandle> {
        self.record_response(from, response, true)
    }

    /// A reply arrived after its request had already failed. The tasks are
    /// handed back, but the neighbor's status belongs to whatever request
    /// is current and is left alone.
    pub fn on_late_response(&mut self, from: Location, response: &TakeResponse) -> Vec<TaskHandle> {
        self.record_response(from, response, false)
    }

    fn record_response(&mut self, from: Location, response: &TakeResponse, settle: bool) -> Vec<TaskHandle> {
        let tasks: Vec<TaskHandle> = response.tasks.iter().copied().filter(|t| !t.is_empty()).collect();
        match self.neighbor_mut(from) {
            Some(neighbor) => {
                if settle {
                    if neighbor.status != NeighborStatus::Requested {
                        debug!(%from, "unsolicited take response");
                    }
                    neighbor.status = NeighborStatus::Idle;
                }
                neighbor.tasks_received += tasks.len() as u64;
                if response.shutting_down && neighbor.can_accept_requests {
                    neighbor.can_accept_requests = false;
                    debug!(%from, "neighbor is shutting down");
                }
            }
            None => warn!(%from, tasks = tasks.len(), "take response from unknown node"),
        }
        tasks
    }

    /// A request to `to` failed or timed out. The next exhaustion retries.
    pub fn on_send_failure(&mut self, to: Location, unreachable: bool) {
        if let Some(neighbor) = self.neighbor_mut(to) {
            neighbor.status = NeighborStatus::Idle;
            neighbor.failures += 1;
            if unreachable {
                neighbor.can_accept_requests = false;
            }
            warn!(neighbor = %to, unreachable, "take request failed");
        }
        self.throttle = 1;
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn neighbor(&self, location: Location) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.location == location)
    }

    pub fn throttle(&self) -> i64 {
        self.throttle
    }

    /// Requests currently awaiting an answer.
    pub fn pending(&self) -> usize {
        self.neighbors
            .iter()
            .filter(|n| n.status == NeighborStatus::Requested)
            .count()
    }
}
