//! Root container: one container per worker plus the affinity machinery.
//!
//! `take` for worker `w` looks, in order, at:
//! 1. `w`'s own container (owner end),
//! 2. the affinity group `w` is currently draining,
//! 3. the staging structure, adopting the next published group,
//! 4. the other workers, round-robin from the context's cached victim,
//!    stealing from their own containers and then their active groups.
//!
//! Every step is bounded, so a take on an idle system visits each other
//! worker once and returns `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use hive_core::{AffinityKey, HiveError, Hint, Location, TaskHandle};

use crate::arena::{Arena, ArenaIndex};
use crate::container::affinity::{AffinityGroup, AffinityState};
use crate::container::priority::PriorityLevels;
use crate::container::staging::Staging;
use crate::container::{Container, StealCursor};
use crate::deque::WorkDeque;
use crate::types::{Count, CountScope, End, SchedulerConfig};

/// Where a taken task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Own { level: usize },
    Active { group: ArenaIndex },
    Staged { group: ArenaIndex },
    Stolen { victim: Location, level: usize },
    StolenFromGroup { victim: Location, group: ArenaIndex },
}

impl Source {
    pub fn group(&self) -> Option<ArenaIndex> {
        match self {
            Source::Active { group }
            | Source::Staged { group }
            | Source::StolenFromGroup { group, .. } => Some(*group),
            _ => None,
        }
    }

    pub fn is_steal(&self) -> bool {
        matches!(self, Source::Stolen { .. } | Source::StolenFromGroup { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Taken {
    pub task: TaskHandle,
    pub source: Source,
}

/// Who is giving: the worker owning `Location`'s container, or a service
/// context sharing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Giver {
    Owner(Location),
    Service(Location),
}

impl Giver {
    pub fn location(&self) -> Location {
        match self {
            Giver::Owner(loc) | Giver::Service(loc) => *loc,
        }
    }
}

/// Where a given task was put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Worker { worker: Location, level: usize },
    Group { key: AffinityKey, published: bool },
}

struct WorkerSlot {
    container: Container,
    /// Cleared when the worker finds its own container empty.
    available: AtomicBool,
    /// Steals repelled since the worker last became available.
    steal_attempts: AtomicU32,
    /// Arena index of the group this worker drains.
    active: Mutex<Option<ArenaIndex>>,
}

impl WorkerSlot {
    fn active(&self) -> MutexGuard<'_, Option<ArenaIndex>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RootArray {
    workers: Vec<WorkerSlot>,
    groups: RwLock<Arena<AffinityGroup>>,
    keys: RwLock<HashMap<AffinityKey, ArenaIndex>>,
    staging: Staging,
    max_steal_repels: u32,
    affinity: bool,
    deque_max_capacity: usize,
    repels: AtomicU64,
}

impl RootArray {
    pub fn new(config: &SchedulerConfig) -> Self {
        let count = config.resolved_workers();
        let workers = (0..count)
            .map(|_| WorkerSlot {
                container: if config.priority_levels > 1 {
                    Container::Priority(
                        PriorityLevels::new(config.priority_levels, config.deque_max_capacity)
                            .with_default_level(config.clamp_level(None)),
                    )
                } else {
                    Container::Deque(WorkDeque::new(config.deque_max_capacity))
                },
                available: AtomicBool::new(false),
                steal_attempts: AtomicU32::new(0),
                active: Mutex::new(None),
            })
            .collect();

        Self {
            workers,
            groups: RwLock::new(Arena::new()),
            keys: RwLock::new(HashMap::new()),
            staging: Staging::new(config.resolved_staging_slots(), config.staging_slot_capacity),
            max_steal_repels: config.max_steal_repels,
            affinity: config.affinity,
            deque_max_capacity: config.deque_max_capacity,
            repels: AtomicU64::new(0),
        }
    }

    fn groups(&self) -> RwLockReadGuard<'_, Arena<AffinityGroup>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn groups_mut(&self) -> RwLockWriteGuard<'_, Arena<AffinityGroup>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: AffinityKey) -> Option<ArenaIndex> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn slot(&self, worker: Location) -> Result<&WorkerSlot, HiveError> {
        self.workers.get(worker.index()).ok_or_else(|| {
            HiveError::violation(format!(
                "{} is outside the root array ({} workers)",
                worker,
                self.workers.len()
            ))
        })
    }

    // ── Give ─────────────────────────────────────────────────────

    /// Place `task` according to `hint`, defaulting to `source`'s container.
    pub fn give(&self, source: Location, task: TaskHandle, hint: &Hint) -> Result<Placement, HiveError> {
        self.give_as(Giver::Owner(source), task, hint)
    }

    pub fn give_as(&self, giver: Giver, task: TaskHandle, hint: &Hint) -> Result<Placement, HiveError> {
        let source = giver.location();
        if self.affinity {
            if let Some(key) = hint.affinity {
                if let Some(placement) = self.give_to_group(key, task)? {
                    return Ok(placement);
                }
                debug!(group = %key, %task, "affinity group unknown, falling back");
            }
        }

        let target = match hint.mapping {
            Some(m) if m.index() < self.workers.len() => m,
            Some(m) => {
                debug!(mapping = %m, %task, "mapping outside root array, falling back");
                source
            }
            None => source,
        };
        // Only the owner pushes at the owner end; everyone else injects.
        let remote = target != source || matches!(giver, Giver::Service(_));
        let slot = self.slot(target)?;
        let level = match &slot.container {
            Container::Priority(p) => {
                let level = hint
                    .priority
                    .map(|l| l as usize)
                    .unwrap_or_else(|| p.default_level());
                if remote {
                    p.inject(task, level)?
                } else {
                    p.insert(task, level)?
                }
            }
            Container::Deque(d) if remote => {
                d.inject(task)?;
                0
            }
            other => {
                other.insert(task, hint, source)?;
                0
            }
        };
        if !slot.available.swap(true, Ordering::AcqRel) {
            slot.steal_attempts.store(0, Ordering::Release);
        }
        Ok(Placement::Worker {
            worker: target,
            level,
        })
    }

    fn give_to_group(&self, key: AffinityKey, task: TaskHandle) -> Result<Option<Placement>, HiveError> {
        let Some(index) = self.lookup(key) else {
            return Ok(None);
        };
        let groups = self.groups();
        let Some(group) = groups.get(index) else {
            return Ok(None);
        };
        let published = group.insert_with(task, || self.staging.push(key, index))?;
        if published {
            debug!(group = %key, "affinity group staged");
        }
        Ok(Some(Placement::Group { key, published }))
    }

    // ── Take ─────────────────────────────────────────────────────

    pub fn take(&self, worker: Location, cursor: &mut StealCursor) -> Option<Taken> {
        let slot = self.workers.get(worker.index())?;

        if let Some((task, level)) = slot.container.remove_end(End::Tail) {
            cursor.level = level;
            return Some(Taken {
                task,
                source: Source::Own { level },
            });
        }
        slot.available.store(false, Ordering::Release);

        if let Some(taken) = self.take_active(worker, slot) {
            return Some(taken);
        }
        if let Some(taken) = self.adopt_staged(worker, slot) {
            return Some(taken);
        }
        self.steal_round(worker, cursor)
    }

    fn take_active(&self, worker: Location, slot: &WorkerSlot) -> Option<Taken> {
        let index = (*slot.active())?;
        {
            let groups = self.groups();
            if let Some(group) = groups.get(index) {
                if let Some(task) = group.drain(worker) {
                    group.task_started();
                    return Some(Taken {
                        task,
                        source: Source::Active { group: index },
                    });
                }
            }
        }
        *slot.active() = None;
        None
    }

    fn adopt_staged(&self, worker: Location, slot: &WorkerSlot) -> Option<Taken> {
        // Bounded by what was staged when we started looking.
        let budget = self.staging.len();
        for _ in 0..budget {
            let index = self.staging.pop(worker.index())?;
            let groups = self.groups();
            let Some(group) = groups.get(index) else {
                continue;
            };
            if group.adopt(worker).is_err() {
                continue;
            }
            *slot.active() = Some(index);
            debug!(group = %group.key(), %worker, "adopted affinity group");
            match group.drain(worker) {
                Some(task) => {
                    group.task_started();
                    return Some(Taken {
                        task,
                        source: Source::Staged { group: index },
                    });
                }
                None => *slot.active() = None,
            }
        }
        None
    }

    fn steal_round(&self, worker: Location, cursor: &mut StealCursor) -> Option<Taken> {
        let n = self.workers.len();
        if n < 2 {
            return None;
        }
        let w = worker.index();
        let start = cursor
            .victim
            .filter(|&v| v < n && v != w)
            .unwrap_or((w + 1) % n);

        let mut victim = start;
        for _ in 0..n {
            if victim != w {
                if let Some(taken) = self.steal_from(victim) {
                    cursor.victim = Some(victim);
                    if let Source::Stolen { level, .. } = taken.source {
                        cursor.level = level;
                    }
                    return Some(taken);
                }
            }
            victim = (victim + 1) % n;
        }

        let mut next = (start + 1) % n;
        if next == w {
            next = (next + 1) % n;
        }
        cursor.victim = Some(next);
        None
    }

    fn steal_from(&self, v: usize) -> Option<Taken> {
        let slot = &self.workers[v];
        let victim = Location(v as u32);

        if !slot.container.is_empty() {
            if slot.steal_attempts.load(Ordering::Acquire) >= self.max_steal_repels {
                if let Some((task, level)) = slot.container.remove_end(End::Head) {
                    return Some(Taken {
                        task,
                        source: Source::Stolen { victim, level },
                    });
                }
            } else {
                slot.steal_attempts.fetch_add(1, Ordering::AcqRel);
                self.repels.fetch_add(1, Ordering::Relaxed);
                debug!(%victim, "steal repelled");
            }
        }

        let index = (*slot.active())?;
        let groups = self.groups();
        let group = groups.get(index)?;
        let task = group.steal().success()?;
        group.task_started();
        Some(Taken {
            task,
            source: Source::StolenFromGroup { victim, group: index },
        })
    }

    // ── Affinity groups ──────────────────────────────────────────

    /// Register a group for `key`. Registering an existing key is a no-op.
    pub fn create_group(&self, key: AffinityKey) -> ArenaIndex {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = keys.get(&key) {
            return *index;
        }
        let index = self
            .groups_mut()
            .insert(AffinityGroup::new(key, self.deque_max_capacity));
        keys.insert(key, index);
        index
    }

    /// Remove an idle group. Later hints naming it fall back.
    pub fn retire_group(&self, key: AffinityKey) -> Result<(), HiveError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = keys.get(&key).copied() else {
            return Err(HiveError::violation(format!("retiring unknown group {key}")));
        };
        let mut groups = self.groups_mut();
        match groups.get(index) {
            Some(group) if group.is_idle() => {}
            Some(group) => {
                return Err(HiveError::violation(format!(
                    "retiring busy group {key} ({:?}, {} queued, {} in flight)",
                    group.state(),
                    group.len(),
                    group.in_flight()
                )));
            }
            None => {}
        }
        groups.remove(index);
        keys.remove(&key);
        Ok(())
    }

    pub fn group_state(&self, key: AffinityKey) -> Option<AffinityState> {
        let index = self.lookup(key)?;
        self.groups().get(index).map(AffinityGroup::state)
    }

    pub fn group_len(&self, key: AffinityKey) -> Option<usize> {
        let index = self.lookup(key)?;
        self.groups().get(index).map(AffinityGroup::len)
    }

    /// Release one in-flight reference on the group at `index`.
    pub fn group_task_done(&self, index: ArenaIndex) {
        if let Some(group) = self.groups().get(index) {
            group.task_done();
        }
    }

    pub fn active_group(&self, worker: Location) -> Option<AffinityKey> {
        let index = (*self.workers.get(worker.index())?.active())?;
        self.groups().get(index).map(AffinityGroup::key)
    }

    pub fn group_count(&self) -> usize {
        self.groups().len()
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn staging_len(&self) -> usize {
        self.staging.len()
    }

    pub fn repel_count(&self) -> u64 {
        self.repels.load(Ordering::Relaxed)
    }

    pub fn is_available(&self, worker: Location) -> bool {
        self.workers
            .get(worker.index())
            .map(|s| s.available.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn steal_attempts(&self, worker: Location) -> u32 {
        self.workers
            .get(worker.index())
            .map(|s| s.steal_attempts.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn count(&self, scope: CountScope) -> Count {
        match scope {
            CountScope::Any => {
                let busy = self.workers.iter().any(|s| !s.container.is_empty())
                    || !self.staging.is_empty()
                    || self.groups().iter().any(|(_, g)| !g.is_empty());
                if busy {
                    Count::NonEmpty
                } else {
                    Count::Empty
                }
            }
            CountScope::All => {
                let own: usize = self
                    .workers
                    .iter()
                    .filter_map(|s| s.container.count(CountScope::All).value())
                    .sum();
                let grouped: usize = self.groups().iter().map(|(_, g)| g.len()).sum();
                Count::Exact(own + grouped)
            }
            CountScope::Level(level) => Count::Exact(
                self.workers
                    .iter()
                    .filter_map(|s| s.container.count(CountScope::Level(level)).value())
                    .sum(),
            ),
            CountScope::Worker(loc) => self
                .workers
                .get(loc.index())
                .map(|s| s.container.count(CountScope::All))
                .unwrap_or(Count::Exact(0)),
            CountScope::Staging => Count::Exact(self.staging.len()),
        }
    }
}

impl std::fmt::Debug for RootArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootArray")
            .field("workers", &self.workers.len())
            .field("groups", &self.group_count())
            .field("staging", &self.staging.len())
            .finish()
    }
}
