//! Per-worker scheduling context.
//!
//! A context is owned by exactly one worker. It remembers which container
//! is its own, where the last successful take came from (so the next take
//! tries the same victim and level first), and which tasks it has taken
//! but not yet reported done.

use std::collections::HashMap;

use serde::Serialize;

use hive_core::{ContextId, HiveError, Location, TaskHandle};

use crate::container::{Source, StealCursor};

/// Per-context counters, folded into the driver metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ContextStats {
    pub given: u64,
    pub taken: u64,
    pub stolen: u64,
    pub empty_takes: u64,
    pub done: u64,
}

#[derive(Debug)]
pub struct SchedContext {
    id: ContextId,
    location: Option<Location>,
    cursor: StealCursor,
    /// Sources of every outstanding take, per handle.
    in_flight: HashMap<TaskHandle, Vec<Source>>,
    in_flight_len: usize,
    stats: ContextStats,
}

impl SchedContext {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            location: None,
            cursor: StealCursor::default(),
            in_flight: HashMap::new(),
            in_flight_len: 0,
            stats: ContextStats::default(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn is_bound(&self) -> bool {
        self.location.is_some()
    }

    /// Bind to `location` among `workers`; the first steal goes to the next worker.
    pub fn bind(&mut self, location: Location, workers: usize) -> Result<(), HiveError> {
        match self.location {
            Some(existing) if existing == location => Ok(()),
            Some(existing) => Err(HiveError::violation(format!(
                "{} already bound to {}, cannot rebind to {}",
                self.id, existing, location
            ))),
            None => {
                self.location = Some(location);
                self.cursor = StealCursor::for_worker(location.index(), workers);
                Ok(())
            }
        }
    }

    pub fn unbind(&mut self) {
        self.location = None;
        self.cursor = StealCursor::default();
    }

    pub fn cursor(&self) -> StealCursor {
        self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut StealCursor {
        &mut self.cursor
    }

    pub(crate) fn record_given(&mut self) {
        self.stats.given += 1;
    }

    pub(crate) fn record_empty(&mut self) {
        self.stats.empty_takes += 1;
    }

    /// Remember a taken task until its `done`.
    ///
    /// The task has already left its container, so a handle that is still
    /// in flight is logged and tracked a second time; each `done` releases
    /// one take.
    pub(crate) fn track(&mut self, task: TaskHandle, source: Source) {
        let sources = self.in_flight.entry(task).or_default();
        if !sources.is_empty() {
            tracing::error!(
                context = %self.id,
                %task,
                in_flight = sources.len(),
                "task taken while already in flight"
            );
        }
        sources.push(source);
        self.in_flight_len += 1;
        self.stats.taken += 1;
        if source.is_steal() {
            self.stats.stolen += 1;
        }
    }

    /// Forget one take of a finished task, returning where it came from.
    pub(crate) fn release(&mut self, task: TaskHandle) -> Result<Source, HiveError> {
        let source = match self.in_flight.get_mut(&task) {
            Some(sources) => {
                let source = sources.pop();
                if sources.is_empty() {
                    self.in_flight.remove(&task);
                }
                source
            }
            None => None,
        };
        let source = source.ok_or_else(|| {
            HiveError::violation(format!("{} reported done for {} it never took", self.id, task))
        })?;
        self.in_flight_len -= 1;
        self.stats.done += 1;
        Ok(source)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_len
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }
}
