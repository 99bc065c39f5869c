//! Work-stealing deque.
//!
//! The owning worker pushes and pops at the tail (LIFO), any other worker
//! steals from the head (FIFO). Every handle that goes in comes out exactly
//! once, through either [`WorkDeque::pop_tail`] or [`WorkDeque::steal_head`].
//!
//! Built on `crossbeam_deque`. The owner end is a LIFO `Worker` behind a
//! lock that only pushers and the owner touch; thieves go through its
//! `Stealer` and never wait. Gives that do not come from the owner land in
//! a per-deque `Injector`, drained by the owner after its own tasks and by
//! thieves after the stealer. The buffers grow on their own; a length
//! counter checked against `max_capacity` makes a push past it fail with
//! `CapacityExhausted`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use crossbeam_deque::{Injector, Stealer, Worker};

use hive_core::{HiveError, TaskHandle};

/// Outcome of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal {
    Success(TaskHandle),
    /// Nothing to steal.
    Empty,
    /// Lost a race with the owner or another thief; try elsewhere.
    Retry,
}

impl Steal {
    pub fn success(self) -> Option<TaskHandle> {
        match self {
            Steal::Success(task) => Some(task),
            _ => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }
}

impl From<crossbeam_deque::Steal<TaskHandle>> for Steal {
    fn from(s: crossbeam_deque::Steal<TaskHandle>) -> Self {
        match s {
            crossbeam_deque::Steal::Success(task) => Steal::Success(task),
            crossbeam_deque::Steal::Empty => Steal::Empty,
            crossbeam_deque::Steal::Retry => Steal::Retry,
        }
    }
}

/// Bounded work-stealing deque of task handles.
pub struct WorkDeque {
    worker: Mutex<Worker<TaskHandle>>,
    stealer: Stealer<TaskHandle>,
    injector: Injector<TaskHandle>,
    /// Reserved before a push, released after a pop or steal.
    len: AtomicUsize,
    max_capacity: usize,
}

impl WorkDeque {
    pub fn new(max_capacity: usize) -> Self {
        let worker = Worker::new_lifo();
        let stealer = worker.stealer();
        Self {
            worker: Mutex::new(worker),
            stealer,
            injector: Injector::new(),
            len: AtomicUsize::new(0),
            max_capacity: max_capacity.max(1),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Worker<TaskHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self) -> Result<(), HiveError> {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| HiveError::CapacityExhausted {
                what: "deque",
                capacity: self.max_capacity,
            })
    }

    fn release(&self) {
        self.len.fetch_sub(1, Ordering::AcqRel);
    }

    /// Owner-end push. Falls back to the injector while the owner end is
    /// busy, so a pusher never waits on a popping owner.
    pub fn push_tail(&self, task: TaskHandle) -> Result<(), HiveError> {
        self.reserve()?;
        match self.worker.try_lock() {
            Ok(worker) => worker.push(task),
            Err(TryLockError::Poisoned(e)) => e.into_inner().push(task),
            Err(TryLockError::WouldBlock) => self.injector.push(task),
        }
        Ok(())
    }

    /// Push from outside the owning worker.
    pub fn inject(&self, task: TaskHandle) -> Result<(), HiveError> {
        self.reserve()?;
        self.injector.push(task);
        Ok(())
    }

    /// Owner end: most recently pushed handle first, then injected ones
    /// oldest first.
    pub fn pop_tail(&self) -> Option<TaskHandle> {
        let task = self.lock_worker().pop().or_else(|| loop {
            match self.injector.steal() {
                crossbeam_deque::Steal::Success(task) => break Some(task),
                crossbeam_deque::Steal::Empty => break None,
                crossbeam_deque::Steal::Retry => continue,
            }
        });
        if task.is_some() {
            self.release();
        }
        task
    }

    /// Any context. Oldest handle first; never waits.
    pub fn steal_head(&self) -> Steal {
        if self.len.load(Ordering::Acquire) == 0 {
            return Steal::Empty;
        }
        let outcome = match Steal::from(self.stealer.steal()) {
            Steal::Success(task) => Steal::Success(task),
            first => match Steal::from(self.injector.steal()) {
                Steal::Empty if first.is_retry() => Steal::Retry,
                second => second,
            },
        };
        if let Steal::Success(_) = outcome {
            self.release();
        }
        outcome
    }

    /// Approximate length, counting pushes still in progress.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

impl std::fmt::Debug for WorkDeque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDeque")
            .field("len", &self.len())
            .field("injected", &self.injector.len())
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}
