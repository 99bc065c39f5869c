//! Handle resolution collaborator.
//!
//! The scheduler never dereferences a [`TaskHandle`]. When a caller gives a
//! task without spelling out a hint, the driver asks a [`TaskResolver`] for
//! the task's scheduling-relevant state and derives the hint from it. The
//! resolver is read-only from the scheduler's point of view.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use hive_core::{AffinityKey, Hint, Location, TaskHandle};

/// Scheduling-relevant view of a task's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub priority: Option<u32>,
    pub affinity: Option<AffinityKey>,
    /// Location of the task's dominant dependency, if it has one.
    pub dominant_slot: Option<Location>,
}

impl TaskState {
    pub fn hint(&self) -> Hint {
        Hint {
            priority: self.priority,
            affinity: self.affinity,
            mapping: self.dominant_slot,
        }
    }
}

pub trait TaskResolver: Send + Sync {
    fn resolve(&self, task: TaskHandle) -> Option<TaskState>;
}

/// In-memory resolver backed by a map. Used by the node binary and tests.
#[derive(Debug, Default)]
pub struct MapResolver {
    states: RwLock<HashMap<TaskHandle, TaskState>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: TaskHandle, state: TaskState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task, state);
    }

    pub fn forget(&self, task: TaskHandle) -> Option<TaskState> {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task)
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskResolver for MapResolver {
    fn resolve(&self, task: TaskHandle) -> Option<TaskState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_to_hint() {
        let r = MapResolver::new();
        let task = TaskHandle::new(3);
        assert!(r.resolve(task).is_none());

        r.insert(
            task,
            TaskState {
                priority: Some(2),
                affinity: Some(AffinityKey(7)),
                dominant_slot: Some(Location(1)),
            },
        );
        let hint = r.resolve(task).unwrap().hint();
        assert_eq!(hint.priority, Some(2));
        assert_eq!(hint.affinity, Some(AffinityKey(7)));
        assert_eq!(hint.mapping, Some(Location(1)));

        assert!(r.forget(task).is_some());
        assert!(r.is_empty());
    }
}
