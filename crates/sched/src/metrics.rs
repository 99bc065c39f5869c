use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::container::Source;
use crate::context::ContextStats;

/// Driver counters, updated with relaxed atomics on the hot path.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub gives: AtomicU64,
    pub takes_own: AtomicU64,
    pub takes_active: AtomicU64,
    pub takes_staged: AtomicU64,
    pub steals: AtomicU64,
    pub group_steals: AtomicU64,
    pub empty_takes: AtomicU64,
    pub done: AtomicU64,
    pub outstanding: AtomicUsize,
    pub max_load: AtomicUsize,
}

impl Counters {
    pub fn record_take(&self, source: &Source) {
        let counter = match source {
            Source::Own { .. } => &self.takes_own,
            Source::Active { .. } => &self.takes_active,
            Source::Staged { .. } => &self.takes_staged,
            Source::Stolen { .. } => &self.steals,
            Source::StolenFromGroup { .. } => &self.group_steals,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a task entering the scheduler; returns the new outstanding total.
    pub fn task_entered(&self) -> usize {
        let now = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_load.fetch_max(now, Ordering::Relaxed);
        now
    }

    pub fn task_left(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Scheduler snapshot exposed to operators and the node binary.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub captured_at: DateTime<Utc>,
    pub workers: usize,
    pub gives: u64,
    /// Takes from the worker's own container.
    pub takes_own: u64,
    /// Takes from the group the worker was already draining.
    pub takes_active: u64,
    /// Takes that adopted a group from staging.
    pub takes_staged: u64,
    pub steals: u64,
    pub group_steals: u64,
    pub empty_takes: u64,
    pub repels: u64,
    pub done: u64,
    /// Given and not yet done.
    pub outstanding: usize,
    /// High-water mark of `outstanding`.
    pub max_load: usize,
    pub staged_groups: usize,
    pub affinity_groups: usize,
    pub contexts: Vec<ContextStats>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            captured_at: Utc::now(),
            workers: 0,
            gives: 0,
            takes_own: 0,
            takes_active: 0,
            takes_staged: 0,
            steals: 0,
            group_steals: 0,
            empty_takes: 0,
            repels: 0,
            done: 0,
            outstanding: 0,
            max_load: 0,
            staged_groups: 0,
            affinity_groups: 0,
            contexts: Vec::new(),
        }
    }
}

impl SchedulerMetrics {
    pub(crate) fn from_counters(c: &Counters) -> Self {
        Self {
            gives: c.gives.load(Ordering::Relaxed),
            takes_own: c.takes_own.load(Ordering::Relaxed),
            takes_active: c.takes_active.load(Ordering::Relaxed),
            takes_staged: c.takes_staged.load(Ordering::Relaxed),
            steals: c.steals.load(Ordering::Relaxed),
            group_steals: c.group_steals.load(Ordering::Relaxed),
            empty_takes: c.empty_takes.load(Ordering::Relaxed),
            done: c.done.load(Ordering::Relaxed),
            outstanding: c.outstanding.load(Ordering::Acquire),
            max_load: c.max_load.load(Ordering::Relaxed),
            ..Self::default()
        }
    }

    /// Successful takes of any kind.
    pub fn takes(&self) -> u64 {
        self.takes_own + self.takes_active + self.takes_staged + self.steals + self.group_steals
    }

    /// Fraction of successful takes that were steals (0.0 - 1.0).
    pub fn steal_ratio(&self) -> f64 {
        let takes = self.takes();
        if takes == 0 {
            return 0.0;
        }
        (self.steals + self.group_steals) as f64 / takes as f64
    }
}
