use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use hive_core::{ContextId, HiveError, Location};

use crate::context::SchedContext;
use crate::runlevel::{Direction, RunLevel, RunlevelParticipant};

use super::Driver;

impl Driver {
    /// One context per worker. Repeated calls keep the existing ones.
    fn allocate_contexts(&self) {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        if !contexts.is_empty() {
            return;
        }
        contexts.extend(
            (0..self.worker_count()).map(|i| Mutex::new(SchedContext::new(ContextId(i as u32)))),
        );
        info!(contexts = contexts.len(), "scheduling contexts allocated");
    }

    /// Bind every still-unbound worker context to its own index.
    fn bind_contexts(&self) -> Result<(), HiveError> {
        let workers = self.worker_count();
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        for (i, slot) in contexts.iter().enumerate().take(workers) {
            let mut ctx = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if !ctx.is_bound() {
                ctx.bind(Location(i as u32), workers)?;
            }
        }
        Ok(())
    }

    fn free_contexts(&self) {
        let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
        let in_flight: usize = contexts
            .iter()
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).in_flight())
            .sum();
        if in_flight > 0 || self.outstanding() > 0 {
            warn!(
                in_flight,
                outstanding = self.outstanding(),
                "freeing contexts with work still outstanding"
            );
        }
        contexts.clear();
        info!("scheduling contexts freed");
    }
}

impl RunlevelParticipant for Driver {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn switch_runlevel(&self, level: RunLevel, phase: u32, direction: Direction) -> Result<(), HiveError> {
        debug!(%level, phase, ?direction, "scheduler runlevel switch");
        match (level, direction) {
            (RunLevel::MemoryOk, Direction::Up) => self.allocate_contexts(),
            (RunLevel::ComputeOk, Direction::Up) => {
                self.bind_contexts()?;
                self.accepting.store(true, Ordering::Release);
                info!(workers = self.worker_count(), "scheduler accepting work");
            }
            (RunLevel::UserOk, Direction::Down) => {
                if self.accepting.swap(false, Ordering::AcqRel) {
                    info!(outstanding = self.outstanding(), "scheduler stopped accepting work");
                }
            }
            (RunLevel::MemoryOk, Direction::Down) => self.free_contexts(),
            _ => {}
        }
        Ok(())
    }
}
