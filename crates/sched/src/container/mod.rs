//! Scheduler containers.
//!
//! [`Container`] is a closed sum type over the four container kinds. The
//! driver only ever talks to the root array, but every kind answers the
//! same `insert` / `remove` / `count` contract so they can be composed and
//! tested on their own.

pub mod affinity;
pub mod priority;
pub mod root;
pub mod staging;

use hive_core::{HiveError, Hint, Location, TaskHandle};

use crate::deque::WorkDeque;
use crate::types::{Count, CountScope, End};

pub use affinity::{AffinityGroup, AffinityState};
pub use priority::PriorityLevels;
pub use root::{Giver, Placement, RootArray, Source, Taken};
pub use staging::Staging;

/// Where a context should look first when it has to steal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StealCursor {
    /// Worker to try first. `None` until the first steal round.
    pub victim: Option<usize>,
    /// Priority level the last successful take came from.
    pub level: usize,
}

impl StealCursor {
    /// Cursor for worker `index` of `count`: start stealing at the next one.
    pub fn for_worker(index: usize, count: usize) -> Self {
        Self {
            victim: (count > 1).then(|| (index + 1) % count),
            level: 0,
        }
    }
}

/// Parameters of a `remove` call.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    pub source: Location,
    pub end: End,
    pub cursor: StealCursor,
}

impl Selector {
    pub fn owner(source: Location) -> Self {
        Self {
            source,
            end: End::Tail,
            cursor: StealCursor::default(),
        }
    }

    pub fn thief(source: Location) -> Self {
        Self {
            source,
            end: End::Head,
            cursor: StealCursor::default(),
        }
    }
}

pub enum Container {
    Deque(WorkDeque),
    Priority(PriorityLevels),
    Affinity(AffinityGroup),
    Root(RootArray),
}

impl Container {
    /// Insert `task`, routed by `hint`. `source` is the inserting location.
    pub fn insert(&self, task: TaskHandle, hint: &Hint, source: Location) -> Result<(), HiveError> {
        match self {
            Container::Deque(d) => d.push_tail(task),
            Container::Priority(p) => {
                let level = hint
                    .priority
                    .map(|l| l as usize)
                    .unwrap_or_else(|| p.default_level());
                p.insert(task, level).map(|_| ())
            }
            Container::Affinity(g) => g.insert(task).map(|_| ()),
            Container::Root(r) => r.give(source, task, hint).map(|_| ()),
        }
    }

    /// Remove one task according to `sel`, updating its cursor.
    pub fn remove(&self, sel: &mut Selector) -> Option<TaskHandle> {
        match self {
            Container::Root(r) => r.take(sel.source, &mut sel.cursor).map(|t| t.task),
            Container::Affinity(g) => g.remove(sel.end, sel.source),
            _ => self.remove_end(sel.end).map(|(task, level)| {
                sel.cursor.level = level;
                task
            }),
        }
    }

    /// Take from one end of a leaf container, reporting the priority level.
    pub(crate) fn remove_end(&self, end: End) -> Option<(TaskHandle, usize)> {
        let task = match (self, end) {
            (Container::Priority(p), _) => return p.remove(end),
            (Container::Root(_), _) => return None,
            (Container::Deque(d), End::Tail) => d.pop_tail(),
            (Container::Deque(d), End::Head) => d.steal_head().success(),
            (Container::Affinity(g), End::Tail) => g.pop_tail(),
            (Container::Affinity(g), End::Head) => g.steal().success(),
        };
        task.map(|task| (task, 0))
    }

    pub fn count(&self, scope: CountScope) -> Count {
        match self {
            Container::Deque(d) => match scope {
                CountScope::Any => {
                    if d.is_empty() {
                        Count::Empty
                    } else {
                        Count::NonEmpty
                    }
                }
                CountScope::Level(l) if l > 0 => Count::Exact(0),
                CountScope::Staging => Count::Empty,
                _ => Count::Exact(d.len()),
            },
            Container::Priority(p) => p.count(scope),
            Container::Affinity(g) => g.count(scope),
            Container::Root(r) => r.count(scope),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count(CountScope::Any).is_empty()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Container::Deque(_) => "deque",
            Container::Priority(_) => "priority",
            Container::Affinity(_) => "affinity",
            Container::Root(_) => "root",
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Container::Deque(d) => d.fmt(f),
            Container::Priority(p) => p.fmt(f),
            Container::Affinity(g) => g.fmt(f),
            Container::Root(r) => r.fmt(f),
        }
    }
}
