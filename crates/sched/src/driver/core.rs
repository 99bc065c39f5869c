use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use hive_core::{ContextId, HiveError};

use crate::container::RootArray;
use crate::context::SchedContext;
use crate::idle::IdleNotifier;
use crate::metrics::{Counters, SchedulerMetrics};
use crate::resolver::TaskResolver;
use crate::runlevel::RunlevelManager;
use crate::types::{CountScope, SchedulerConfig};

/// The scheduler driver. Owns the root array and one context per worker,
/// and forwards idle/ready events to an optional [`IdleNotifier`].
pub struct Driver {
    pub(super) config: SchedulerConfig,
    pub(super) root: RootArray,
    /// Allocated at memory-ready, freed at tear-down. Each context sits
    /// behind its own lock, taken only by the worker that owns it.
    pub(super) contexts: RwLock<Vec<Mutex<SchedContext>>>,
    /// Cleared when the node stops accepting user work.
    pub(super) accepting: AtomicBool,
    pub(super) counters: Counters,
    pub(super) resolver: Option<Arc<dyn TaskResolver>>,
    pub(super) idle: Option<Arc<dyn IdleNotifier>>,
}

impl Driver {
    pub fn new(config: SchedulerConfig) -> Result<Self, HiveError> {
        config.validate()?;
        let root = RootArray::new(&config);
        info!(
            workers = root.worker_count(),
            priority_levels = config.priority_levels,
            max_steal_repels = config.max_steal_repels,
            affinity = config.affinity,
            "scheduler driver created"
        );
        Ok(Self {
            config,
            root,
            contexts: RwLock::new(Vec::new()),
            accepting: AtomicBool::new(false),
            counters: Counters::default(),
            resolver: None,
            idle: None,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TaskResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_idle_notifier(mut self, notifier: Arc<dyn IdleNotifier>) -> Self {
        self.idle = Some(notifier);
        self
    }

    /// Wrap the driver in an `Arc` and bring it up through every runlevel.
    ///
    /// For embedders with no other participants; the manager is dropped.
    pub fn started(self) -> Result<Arc<Self>, HiveError> {
        let driver = Arc::new(self);
        let mut manager = RunlevelManager::new();
        manager.register(driver.clone());
        manager.bring_up()?;
        Ok(driver)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn root(&self) -> &RootArray {
        &self.root
    }

    pub fn worker_count(&self) -> usize {
        self.root.worker_count()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Tasks given and not yet reported done.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// Snapshot of the driver counters and per-context statistics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let contexts = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).stats())
            .collect();
        SchedulerMetrics {
            workers: self.worker_count(),
            repels: self.root.repel_count(),
            staged_groups: self
                .root
                .count(CountScope::Staging)
                .value()
                .unwrap_or_default(),
            affinity_groups: self.root.group_count(),
            contexts,
            ..SchedulerMetrics::from_counters(&self.counters)
        }
    }

    /// Run `f` on context `id` under its lock.
    pub(super) fn with_context<R>(
        &self,
        id: ContextId,
        f: impl FnOnce(&mut SchedContext) -> Result<R, HiveError>,
    ) -> Result<R, HiveError> {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        let slot = contexts.get(id.index()).ok_or(HiveError::UnknownContext(id))?;
        let mut ctx = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ctx)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("root", &self.root)
            .field("contexts", &self.context_count())
            .field("accepting", &self.is_accepting())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
