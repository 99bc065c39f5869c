//! N-level priority container.
//!
//! Level 0 is the highest priority. Each level is a [`WorkDeque`]. A
//! `lowest_non_empty` cursor lets `remove` resume its scan where the last
//! one found work instead of rescanning from level 0 every time.
//!
//! The cursor packs `(epoch, level)` into one atomic word. Every insert
//! bumps the epoch while lowering the level; a remover only publishes a new
//! cursor if the epoch it started from is still current. That way a
//! concurrent insert into a level the remover already passed can never be
//! hidden behind a raised cursor.

use std::sync::atomic::{AtomicU64, Ordering};

use hive_core::{HiveError, TaskHandle};

use crate::deque::{Steal, WorkDeque};
use crate::types::{Count, CountScope, End};

fn pack(epoch: u32, level: u32) -> u64 {
    ((epoch as u64) << 32) | level as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

pub struct PriorityLevels {
    levels: Vec<WorkDeque>,
    cursor: AtomicU64,
    default_level: usize,
}

impl PriorityLevels {
    pub fn new(levels: usize, deque_max_capacity: usize) -> Self {
        let levels = levels.max(1);
        Self {
            levels: (0..levels)
                .map(|_| WorkDeque::new(deque_max_capacity))
                .collect(),
            cursor: AtomicU64::new(pack(0, levels as u32)),
            default_level: 0,
        }
    }

    /// Level used by inserts that carry no priority.
    pub fn with_default_level(mut self, level: usize) -> Self {
        self.default_level = level.min(self.levels.len() - 1);
        self
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn default_level(&self) -> usize {
        self.default_level
    }

    /// Lowest level that may hold work; `level_count()` when known empty.
    pub fn lowest_non_empty(&self) -> usize {
        unpack(self.cursor.load(Ordering::Acquire)).1 as usize
    }

    /// Insert at `level`, clamped into `[0, N-1]`.
    pub fn insert(&self, task: TaskHandle, level: usize) -> Result<usize, HiveError> {
        let level = level.min(self.levels.len() - 1);
        self.levels[level].push_tail(task)?;
        self.lower_cursor(level);
        Ok(level)
    }

    /// Like [`PriorityLevels::insert`], for a giver that is not the owner.
    pub fn inject(&self, task: TaskHandle, level: usize) -> Result<usize, HiveError> {
        let level = level.min(self.levels.len() - 1);
        self.levels[level].inject(task)?;
        self.lower_cursor(level);
        Ok(level)
    }

    fn lower_cursor(&self, level: usize) {
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            let (epoch, lowest) = unpack(current);
            let next = pack(epoch.wrapping_add(1), lowest.min(level as u32));
            match self.cursor.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take from the first non-empty level at or above the cursor.
    ///
    /// Returns the task and the level it came from.
    pub fn remove(&self, end: End) -> Option<(TaskHandle, usize)> {
        let observed = self.cursor.load(Ordering::Acquire);
        let (epoch, start) = unpack(observed);
        let mut contended = false;

        for level in (start as usize)..self.levels.len() {
            let deque = &self.levels[level];
            let found = match end {
                End::Tail => deque.pop_tail(),
                End::Head => match deque.steal_head() {
                    Steal::Success(task) => Some(task),
                    Steal::Retry => {
                        contended = true;
                        None
                    }
                    Steal::Empty => None,
                },
            };
            if let Some(task) = found {
                if !contended {
                    self.publish(observed, pack(epoch, level as u32));
                }
                return Some((task, level));
            }
        }

        if !contended {
            self.publish(observed, pack(epoch, self.levels.len() as u32));
        }
        None
    }

    fn publish(&self, observed: u64, next: u64) {
        // Failure means an insert landed meanwhile; its cursor wins.
        let _ = self
            .cursor
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(WorkDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(WorkDeque::is_empty)
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
            CountScope::Level(level) => {
                Count::Exact(self.levels.get(level).map(WorkDeque::len).unwrap_or(0))
            }
            CountScope::All | CountScope::Worker(_) => Count::Exact(self.len()),
            CountScope::Staging => Count::Empty,
        }
    }
}

impl std::fmt::Debug for PriorityLevels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityLevels")
            .field("levels", &self.levels.len())
            .field("lowest_non_empty", &self.lowest_non_empty())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> TaskHandle {
        TaskHandle::new(n)
    }

    #[test]
    fn removes_in_priority_order() {
        let p = PriorityLevels::new(3, 64);
        p.insert(t(2), 2).unwrap();
        p.insert(t(0), 0).unwrap();
        p.insert(t(1), 1).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| p.remove(End::Tail)).collect();
        assert_eq!(order, vec![(t(0), 0), (t(1), 1), (t(2), 2)]);
    }

    #[test]
    fn default_level_is_clamped_too() {
        let p = PriorityLevels::new(2, 64).with_default_level(5);
        assert_eq!(p.default_level(), 1);
    }

    #[test]
    fn level_is_clamped() {
        let p = PriorityLevels::new(4, 64);
        assert_eq!(p.insert(t(1), 17).unwrap(), 3);
        assert_eq!(p.count(CountScope::Level(3)), Count::Exact(1));
    }

    #[test]
    fn cursor_follows_inserts_and_removes() {
        let p = PriorityLevels::new(4, 64);
        assert_eq!(p.lowest_non_empty(), 4, "empty container parks the cursor past the end");

        p.insert(t(1), 2).unwrap();
        assert_eq!(p.lowest_non_empty(), 2);
        p.insert(t(2), 1).unwrap();
        assert_eq!(p.lowest_non_empty(), 1);

        assert_eq!(p.remove(End::Tail), Some((t(2), 1)));
        assert_eq!(p.lowest_non_empty(), 1, "cursor stays where work was found");
        assert_eq!(p.remove(End::Tail), Some((t(1), 2)));
        assert_eq!(p.lowest_non_empty(), 2);
        assert_eq!(p.remove(End::Tail), None);
        assert_eq!(p.lowest_non_empty(), 4);
    }

    #[test]
    fn thieves_take_oldest_within_level() {
        let p = PriorityLevels::new(2, 64);
        p.insert(t(1), 1).unwrap();
        p.insert(t(2), 1).unwrap();
        assert_eq!(p.remove(End::Head), Some((t(1), 1)));
        assert_eq!(p.remove(End::Tail), Some((t(2), 1)));
    }

    #[test]
    fn injected_tasks_lower_the_cursor() {
        let p = PriorityLevels::new(3, 64);
        p.insert(t(1), 2).unwrap();
        assert_eq!(p.inject(t(2), 0).unwrap(), 0);
        assert_eq!(p.lowest_non_empty(), 0);
        assert_eq!(p.remove(End::Tail), Some((t(2), 0)));
        assert_eq!(p.remove(End::Tail), Some((t(1), 2)));
    }

    #[test]
    fn count_scopes() {
        let p = PriorityLevels::new(2, 64);
        assert_eq!(p.count(CountScope::Any), Count::Empty);
        p.insert(t(1), 0).unwrap();
        p.insert(t(2), 1).unwrap();
        assert_eq!(p.count(CountScope::Any), Count::NonEmpty);
        assert_eq!(p.count(CountScope::All), Count::Exact(2));
        assert_eq!(p.count(CountScope::Level(0)), Count::Exact(1));
        assert_eq!(p.count(CountScope::Level(9)), Count::Exact(0));
    }
}
