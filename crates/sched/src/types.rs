use serde::{Deserialize, Serialize};

use hive_core::config::SchedulerSettings;
use hive_core::{HiveError, Location};

/// Which end of a deque a removal takes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum End {
    /// Owner end, LIFO.
    Tail,
    /// Thief end, FIFO.
    Head,
}

/// Answer to a `count` query.
///
/// Aggregate counts are kept with relaxed atomics, so callers must treat
/// them as a hint that can be refined by a later query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Count {
    Exact(usize),
    NonEmpty,
    Empty,
}

impl Count {
    pub fn exact(n: usize) -> Self {
        Count::Exact(n)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Count::Empty | Count::Exact(0))
    }

    /// Exact value if known.
    pub fn value(&self) -> Option<usize> {
        match self {
            Count::Exact(n) => Some(*n),
            Count::Empty => Some(0),
            Count::NonEmpty => None,
        }
    }
}

/// What a `count` query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountScope {
    /// Emptiness only, answered by short-circuit.
    Any,
    /// Everything held by the container.
    All,
    /// One priority level.
    Level(usize),
    /// One worker's own container (root arrays only).
    Worker(Location),
    /// Groups waiting in staging (root arrays only).
    Staging,
}

/// Scheduler configuration, typically parsed from TOML or built from env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of workers. 0 = available parallelism.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Priority levels per worker. 1 gives each worker a plain deque.
    #[serde(default = "default_priority_levels")]
    pub priority_levels: usize,
    /// Level used when a give carries no priority.
    #[serde(default = "default_priority")]
    pub default_priority: u32,
    /// Tasks a single deque may hold; pushes beyond it fail.
    #[serde(default = "default_deque_max_capacity")]
    pub deque_max_capacity: usize,
    /// Staging slots for affinity groups. 0 = one per worker.
    #[serde(default = "default_staging_slots")]
    pub staging_slots: usize,
    /// Groups each staging slot can hold.
    #[serde(default = "default_staging_slot_capacity")]
    pub staging_slot_capacity: usize,
    /// Failed steal attempts a victim repels before a steal is allowed.
    #[serde(default = "default_max_steal_repels")]
    pub max_steal_repels: u32,
    /// Honour affinity hints. When off, affinity hints are ignored.
    #[serde(default = "default_affinity")]
    pub affinity: bool,
}

fn default_workers() -> usize { 0 }
fn default_priority_levels() -> usize { 4 }
fn default_priority() -> u32 { 1 }
fn default_deque_max_capacity() -> usize { 1 << 20 }
fn default_staging_slots() -> usize { 0 }
fn default_staging_slot_capacity() -> usize { 1024 }
fn default_max_steal_repels() -> u32 { 0 }
fn default_affinity() -> bool { true }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            priority_levels: default_priority_levels(),
            default_priority: default_priority(),
            deque_max_capacity: default_deque_max_capacity(),
            staging_slots: default_staging_slots(),
            staging_slot_capacity: default_staging_slot_capacity(),
            max_steal_repels: default_max_steal_repels(),
            affinity: default_affinity(),
        }
    }
}

impl SchedulerConfig {
    /// Convenience for tests and simulations.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    pub fn resolved_staging_slots(&self) -> usize {
        if self.staging_slots == 0 {
            self.resolved_workers()
        } else {
            self.staging_slots
        }
    }

    /// Affinity groups staging can hold at once across every slot.
    pub fn staging_capacity(&self) -> usize {
        self.resolved_staging_slots()
            .saturating_mul(self.staging_slot_capacity)
    }

    /// Clamp a requested priority into `[0, levels - 1]`.
    pub fn clamp_level(&self, priority: Option<u32>) -> usize {
        let top = self.priority_levels.saturating_sub(1);
        (priority.unwrap_or(self.default_priority) as usize).min(top)
    }

    pub fn validate(&self) -> Result<(), HiveError> {
        if self.priority_levels == 0 {
            return Err(HiveError::Config("priority_levels must be at least 1".into()));
        }
        if self.deque_max_capacity == 0 {
            return Err(HiveError::Config("deque_max_capacity must be positive".into()));
        }
        if self.staging_slot_capacity == 0 {
            return Err(HiveError::Config("staging_slot_capacity must be positive".into()));
        }
        if self.resolved_workers() > u32::MAX as usize {
            return Err(HiveError::Config("too many workers".into()));
        }
        Ok(())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(s: &SchedulerSettings) -> Self {
        Self {
            workers: s.workers,
            priority_levels: s.priority_levels,
            deque_max_capacity: s.deque_max_capacity,
            max_steal_repels: s.max_steal_repels,
            affinity: s.affinity_enabled,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.priority_levels, 4);
        assert_eq!(config.max_steal_repels, 0);
        assert!(config.affinity);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resolved_workers() {
        let mut config = SchedulerConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_workers() > 0);

        config.workers = 8;
        assert_eq!(config.resolved_workers(), 8);
        assert_eq!(config.resolved_staging_slots(), 8);
        config.staging_slots = 3;
        assert_eq!(config.resolved_staging_slots(), 3);
    }

    #[test]
    fn staging_capacity_spans_every_slot() {
        let config = SchedulerConfig {
            workers: 4,
            staging_slot_capacity: 16,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.staging_capacity(), 64, "one slot per worker by default");

        let config = SchedulerConfig {
            staging_slots: 2,
            ..config
        };
        assert_eq!(config.staging_capacity(), 32);
    }

    #[test]
    fn clamp_level_bounds() {
        let config = SchedulerConfig::default();
        assert_eq!(config.clamp_level(Some(0)), 0);
        assert_eq!(config.clamp_level(Some(3)), 3);
        assert_eq!(config.clamp_level(Some(99)), 3);
        assert_eq!(config.clamp_level(None), 1);
    }

    #[test]
    fn parse_partial_toml() {
        let config: SchedulerConfig = toml::from_str("workers = 2\nmax_steal_repels = 5\n").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_steal_repels, 5);
        assert_eq!(config.priority_levels, 4, "unset fields take defaults");
    }

    #[test]
    fn validate_rejects_bad_sizes() {
        let config = SchedulerConfig {
            priority_levels: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            deque_max_capacity: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn count_helpers() {
        assert!(Count::Empty.is_empty());
        assert!(Count::Exact(0).is_empty());
        assert!(!Count::NonEmpty.is_empty());
        assert_eq!(Count::NonEmpty.value(), None);
        assert_eq!(Count::Exact(3).value(), Some(3));
    }
}
