use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};

use tracing::{info, trace};

use hive_core::{AffinityKey, ContextId, HiveError, Hint, Location, TaskHandle};

use crate::container::{Giver, Placement};
use crate::context::SchedContext;
use crate::types::{Count, CountScope};

use super::Driver;

fn bound(ctx: &SchedContext) -> Result<Location, HiveError> {
    ctx.location().ok_or_else(|| {
        HiveError::violation(format!("{} used before register_context", ctx.id()))
    })
}

impl Driver {
    /// Make `task` runnable, placed according to `hint`.
    pub fn give(&self, context: ContextId, task: TaskHandle, hint: &Hint) -> Result<(), HiveError> {
        if task.is_empty() {
            return Err(HiveError::violation(format!("{context} gave the empty task handle")));
        }
        if !self.is_accepting() {
            return Err(HiveError::NotRunning("give"));
        }

        // Counted before it becomes visible, so a racing done cannot underflow.
        self.counters.task_entered();
        let workers = self.worker_count();
        let placed = self.with_context(context, |ctx| {
            let source = bound(ctx)?;
            // Contexts past the worker ids are service contexts.
            let giver = if (ctx.id().0 as usize) < workers {
                Giver::Owner(source)
            } else {
                Giver::Service(source)
            };
            let placement = self.root.give_as(giver, task, hint)?;
            ctx.record_given();
            Ok(placement)
        });
        let placement = match placed {
            Ok(p) => p,
            Err(e) => {
                self.counters.task_left();
                return Err(e);
            }
        };
        self.counters.gives.fetch_add(1, Ordering::Relaxed);
        trace!(%context, %task, ?placement, "task given");

        if let Some(idle) = &self.idle {
            let target = match placement {
                Placement::Worker { worker, .. } => Some(worker),
                Placement::Group { .. } => None,
            };
            idle.ready(target);
        }
        Ok(())
    }

    /// Give `task` with a hint read from the installed [`TaskResolver`].
    ///
    /// [`TaskResolver`]: crate::resolver::TaskResolver
    pub fn give_resolved(&self, context: ContextId, task: TaskHandle) -> Result<(), HiveError> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| HiveError::Config("no task resolver installed".into()))?;
        let hint = resolver.resolve(task).map(|s| s.hint()).unwrap_or_default();
        self.give(context, task, &hint)
    }

    /// Take the next task for `context`. `Ok(None)` means nothing was found
    /// anywhere; callers poll, back off or park.
    pub fn take(&self, context: ContextId) -> Result<Option<TaskHandle>, HiveError> {
        let (worker, taken) = self.with_context(context, |ctx| {
            let worker = bound(ctx)?;
            let taken = self.root.take(worker, ctx.cursor_mut());
            match taken {
                Some(t) => ctx.track(t.task, t.source),
                None => ctx.record_empty(),
            }
            Ok((worker, taken))
        })?;

        match taken {
            Some(t) => {
                self.counters.record_take(&t.source);
                trace!(%context, task = %t.task, source = ?t.source, "task taken");
                Ok(Some(t.task))
            }
            None => {
                self.counters.empty_takes.fetch_add(1, Ordering::Relaxed);
                if let Some(idle) = &self.idle {
                    idle.idle(worker);
                }
                Ok(None)
            }
        }
    }

    /// Up to `max` takes in a row, stopping at the first empty one.
    ///
    /// Every returned task is in flight for `context` until its `done`.
    pub fn take_batch(&self, context: ContextId, max: usize) -> Result<Vec<TaskHandle>, HiveError> {
        let mut batch = Vec::with_capacity(max.min(64));
        while batch.len() < max {
            match self.take(context)? {
                Some(task) => batch.push(task),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Report that a task taken by `context` has finished.
    pub fn done(&self, context: ContextId, task: TaskHandle) -> Result<(), HiveError> {
        let source = self.with_context(context, |ctx| ctx.release(task))?;
        if let Some(group) = source.group() {
            self.root.group_task_done(group);
        }
        self.counters.task_left();
        self.counters.done.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Bind `context` to worker `location`. Binding twice to the same
    /// location is a no-op; to a different one it is a violation.
    pub fn register_context(&self, context: ContextId, location: Location) -> Result<(), HiveError> {
        let workers = self.worker_count();
        if location.index() >= workers {
            return Err(HiveError::violation(format!(
                "{context} registered at {location}, outside {workers} workers"
            )));
        }
        self.with_context(context, |ctx| ctx.bind(location, workers))?;
        info!(%context, %location, "context registered");
        Ok(())
    }

    /// Add a context bound to `location`, for service threads that give and
    /// take alongside the workers (the distributed responder, for one).
    pub fn open_context(&self, location: Location) -> Result<ContextId, HiveError> {
        let workers = self.worker_count();
        if location.index() >= workers {
            return Err(HiveError::violation(format!(
                "context opened at {location}, outside {workers} workers"
            )));
        }
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        if contexts.is_empty() {
            return Err(HiveError::NotRunning("open_context"));
        }
        let id = ContextId(contexts.len() as u32);
        let mut ctx = SchedContext::new(id);
        ctx.bind(location, workers)?;
        contexts.push(Mutex::new(ctx));
        info!(context = %id, %location, "service context opened");
        Ok(id)
    }

    // ── Affinity groups ──────────────────────────────────────────

    pub fn create_affinity_group(&self, key: AffinityKey) {
        let index = self.root.create_group(key);
        info!(group = %key, slot = index.slot(), "affinity group created");
    }

    /// Remove a group that is `New`, empty and has nothing in flight.
    pub fn retire_affinity_group(&self, key: AffinityKey) -> Result<(), HiveError> {
        self.root.retire_group(key)?;
        info!(group = %key, "affinity group retired");
        Ok(())
    }

    pub fn count(&self, scope: CountScope) -> Count {
        self.root.count(scope)
    }
}
