use serde::{Deserialize, Serialize};

/// Opaque identifier for a schedulable unit of work.
///
/// The scheduler never looks inside a handle; it only moves it between
/// containers. Raw value 0 is reserved as [`TaskHandle::EMPTY`] for wire
/// payloads. In-process APIs use `Option<TaskHandle>` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub const EMPTY: TaskHandle = TaskHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{:x}", self.0)
    }
}

/// A worker inside one node, or a node in the distributed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub u32);

impl Location {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loc{}", self.0)
    }
}

/// Identifier of a scheduling context (one per worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl ContextId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Placement key shared by tasks that should run near each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffinityKey(pub u64);

impl std::fmt::Display for AffinityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "aff{}", self.0)
    }
}

/// Placement hints attached to a `give`.
///
/// Every field is optional. An empty hint places the task in the
/// caller's own container at the default priority level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    /// Priority level, 0 is highest. Out-of-range values are clamped.
    pub priority: Option<u32>,
    /// Affinity group the task belongs to.
    pub affinity: Option<AffinityKey>,
    /// Explicit target worker.
    pub mapping: Option<Location>,
}

impl Hint {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn priority(level: u32) -> Self {
        Self {
            priority: Some(level),
            ..Self::default()
        }
    }

    pub fn affinity(key: AffinityKey) -> Self {
        Self {
            affinity: Some(key),
            ..Self::default()
        }
    }

    pub fn mapped(location: Location) -> Self {
        Self {
            mapping: Some(location),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, level: u32) -> Self {
        self.priority = Some(level);
        self
    }

    pub fn is_none(&self) -> bool {
        self.priority.is_none() && self.affinity.is_none() && self.mapping.is_none()
    }
}
