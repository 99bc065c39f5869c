//! Affinity group: a deque scoped to a placement key, with a lifecycle.
//!
//! `New` (not published) → `Staged` (waiting in staging) → `Active` (one
//! worker drains it) → back to `New` once that worker finds it empty.
//!
//! Lifecycle transitions happen under a per-group lock that also covers the
//! insert which triggers staging, so two inserters racing on a `New` group
//! publish it exactly once, and a drainer releasing an empty group cannot
//! miss a task pushed concurrently.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use hive_core::{AffinityKey, HiveError, Location, TaskHandle};

use crate::deque::{Steal, WorkDeque};
use crate::types::{Count, CountScope, End};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityState {
    New,
    Staged,
    Active,
}

#[derive(Debug)]
struct Lifecycle {
    state: AffinityState,
    drainer: Option<Location>,
}

pub struct AffinityGroup {
    key: AffinityKey,
    deque: WorkDeque,
    lifecycle: Mutex<Lifecycle>,
    /// Tasks taken from this group and not yet reported done.
    in_flight: AtomicUsize,
    /// Number of New→Staged transitions so far.
    stagings: AtomicU64,
}

impl AffinityGroup {
    pub fn new(key: AffinityKey, deque_max_capacity: usize) -> Self {
        Self {
            key,
            deque: WorkDeque::new(deque_max_capacity),
            lifecycle: Mutex::new(Lifecycle {
                state: AffinityState::New,
                drainer: None,
            }),
            in_flight: AtomicUsize::new(0),
            stagings: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> AffinityKey {
        self.key
    }

    pub fn state(&self) -> AffinityState {
        self.lock().state
    }

    pub fn drainer(&self) -> Option<Location> {
        self.lock().drainer
    }

    /// Insert a task; if the group was `New`, run `publish` and move to `Staged`.
    ///
    /// Returns `true` when this insert published the group. `publish` runs
    /// before the push, so a failed publish leaves the group `New` and the
    /// task unqueued. Adopters block on the lifecycle lock until the push
    /// below has landed.
    pub fn insert_with<F>(&self, task: TaskHandle, publish: F) -> Result<bool, HiveError>
    where
        F: FnOnce() -> Result<(), HiveError>,
    {
        let mut life = self.lock();
        if life.state != AffinityState::New {
            self.deque.push_tail(task)?;
            return Ok(false);
        }
        publish()?;
        life.state = AffinityState::Staged;
        self.stagings.fetch_add(1, Ordering::Relaxed);
        // Already published: an empty group is released by its adopter.
        self.deque.push_tail(task)?;
        Ok(true)
    }

    /// Owner-end pop without lifecycle handling.
    pub(crate) fn pop_tail(&self) -> Option<TaskHandle> {
        self.deque.pop_tail()
    }

    /// Insert without an external staging structure.
    pub fn insert(&self, task: TaskHandle) -> Result<bool, HiveError> {
        self.insert_with(task, || Ok(()))
    }

    /// `Staged → Active`, making `worker` the sole drainer.
    pub fn adopt(&self, worker: Location) -> Result<(), HiveError> {
        let mut life = self.lock();
        if life.state != AffinityState::Staged {
            return Err(HiveError::violation(format!(
                "{} adopted by {} while {:?}",
                self.key, worker, life.state
            )));
        }
        life.state = AffinityState::Active;
        life.drainer = Some(worker);
        Ok(())
    }

    /// Drainer-side take. `None` means the group was released back to `New`
    /// (or is no longer drained by `worker`) and must leave the active table.
    pub fn drain(&self, worker: Location) -> Option<TaskHandle> {
        if let Some(task) = self.deque.pop_tail() {
            return Some(task);
        }
        let mut life = self.lock();
        if life.state != AffinityState::Active || life.drainer != Some(worker) {
            return None;
        }
        if let Some(task) = self.deque.pop_tail() {
            return Some(task);
        }
        life.state = AffinityState::New;
        life.drainer = None;
        tracing::debug!(group = %self.key, %worker, "affinity group drained");
        None
    }

    /// Thief-side take from the old end.
    pub fn steal(&self) -> Steal {
        self.deque.steal_head()
    }

    /// Generic container removal for a group used on its own.
    pub fn remove(&self, end: End, source: Location) -> Option<TaskHandle> {
        match end {
            End::Head => self.steal().success(),
            End::Tail => {
                {
                    let mut life = self.lock();
                    if life.state == AffinityState::Staged {
                        life.state = AffinityState::Active;
                        life.drainer = Some(source);
                    }
                }
                self.drain(source)
            }
        }
    }

    pub fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn task_done(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stagings(&self) -> u64 {
        self.stagings.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// No queued work, nothing running, not published anywhere.
    pub fn is_idle(&self) -> bool {
        let life = self.lock();
        life.state == AffinityState::New && self.deque.is_empty() && self.in_flight() == 0
    }

    pub fn count(&self, scope: CountScope) -> Count {
        match scope {
            CountScope::Any => {
                if self.is_empty() {
                    Count::Empty
                } else {
                    Count::NonEmpty
                }
            }
            CountScope::Staging => Count::Empty,
            _ => Count::Exact(self.len()),
        }
    }
}

impl std::fmt::Debug for AffinityGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityGroup")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("len", &self.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> TaskHandle {
        TaskHandle::new(n)
    }

    fn group() -> AffinityGroup {
        AffinityGroup::new(AffinityKey(9), 64)
    }

    #[test]
    fn first_insert_publishes_once() {
        let g = group();
        assert!(g.insert(t(1)).unwrap(), "first insert stages the group");
        assert!(!g.insert(t(2)).unwrap(), "group already staged");
        assert_eq!(g.state(), AffinityState::Staged);
        assert_eq!(g.stagings(), 1);
    }

    #[test]
    fn failed_publish_rolls_back() {
        let g = group();
        let err = g
            .insert_with(t(1), || {
                Err(HiveError::CapacityExhausted {
                    what: "staging slot",
                    capacity: 0,
                })
            })
            .unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(g.state(), AffinityState::New);
        assert!(g.is_empty(), "rejected task must not stay queued");
    }

    #[test]
    fn lifecycle_cycles_back_to_new() {
        let g = group();
        let w = Location(0);
        g.insert(t(1)).unwrap();
        g.adopt(w).unwrap();
        assert_eq!(g.state(), AffinityState::Active);
        assert_eq!(g.drainer(), Some(w));

        assert_eq!(g.drain(w), Some(t(1)));
        assert_eq!(g.drain(w), None);
        assert_eq!(g.state(), AffinityState::New);

        assert!(g.insert(t(2)).unwrap(), "re-staged after drain-to-empty");
        assert_eq!(g.stagings(), 2);
    }

    #[test]
    fn adopt_requires_staged() {
        let g = group();
        let err = g.adopt(Location(1)).unwrap_err();
        assert!(matches!(err, HiveError::ProtocolViolation(_)));
    }

    #[test]
    fn drain_by_non_owner_does_not_release() {
        let g = group();
        g.insert(t(1)).unwrap();
        g.adopt(Location(0)).unwrap();
        assert_eq!(g.steal(), Steal::Success(t(1)));
        assert_eq!(g.drain(Location(3)), None);
        assert_eq!(g.state(), AffinityState::Active, "only the drainer releases");
    }

    #[test]
    fn in_flight_never_underflows() {
        let g = group();
        g.task_done();
        assert_eq!(g.in_flight(), 0);
        g.task_started();
        assert!(!g.is_idle());
        g.task_done();
        assert!(g.is_idle());
    }

    #[test]
    fn concurrent_inserts_stage_once() {
        use std::sync::Arc;
        use std::thread;

        let g = Arc::new(AffinityGroup::new(AffinityKey(9), 1024));
        let publishes = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let g = Arc::clone(&g);
                let publishes = Arc::clone(&publishes);
                thread::spawn(move || {
                    for n in 0..100 {
                        g.insert_with(t(i * 1000 + n + 1), || {
                            publishes.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(publishes.load(Ordering::SeqCst), 1);
        assert_eq!(g.len(), 200);
    }
}
