//! Runlevel bring-up and tear-down.
//!
//! A node comes up by walking [`RunLevel`]s upward, each split into a
//! configurable number of phases, and goes down by walking them in
//! reverse. Participants get one `switch_runlevel` call per
//! (level, phase, direction); the manager records every transition it has
//! delivered so replaying one is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use hive_core::HiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunLevel {
    ConfigParse,
    NetworkOk,
    PdOk,
    MemoryOk,
    GuidOk,
    ComputeOk,
    UserOk,
}

impl RunLevel {
    pub const ALL: [RunLevel; 7] = [
        RunLevel::ConfigParse,
        RunLevel::NetworkOk,
        RunLevel::PdOk,
        RunLevel::MemoryOk,
        RunLevel::GuidOk,
        RunLevel::ComputeOk,
        RunLevel::UserOk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunLevel::ConfigParse => "config-parse",
            RunLevel::NetworkOk => "network-ok",
            RunLevel::PdOk => "pd-ok",
            RunLevel::MemoryOk => "memory-ok",
            RunLevel::GuidOk => "guid-ok",
            RunLevel::ComputeOk => "compute-ok",
            RunLevel::UserOk => "user-ok",
        }
    }
}

impl fmt::Display for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// Something that takes part in bring-up and tear-down.
pub trait RunlevelParticipant: Send + Sync {
    fn name(&self) -> &str;

    fn switch_runlevel(&self, level: RunLevel, phase: u32, direction: Direction) -> Result<(), HiveError>;
}

/// Drives registered participants through the runlevels.
pub struct RunlevelManager {
    participants: Vec<Arc<dyn RunlevelParticipant>>,
    phases: HashMap<RunLevel, u32>,
    /// Last direction delivered per (participant, level, phase).
    delivered: HashMap<(usize, RunLevel, u32), Direction>,
    current: Option<RunLevel>,
}

impl RunlevelManager {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            phases: HashMap::new(),
            delivered: HashMap::new(),
            current: None,
        }
    }

    pub fn register(&mut self, participant: Arc<dyn RunlevelParticipant>) {
        info!(participant = participant.name(), "registered runlevel participant");
        self.participants.push(participant);
    }

    /// Split `level` into `phases` sub-steps (at least one).
    pub fn with_phases(mut self, level: RunLevel, phases: u32) -> Self {
        self.phases.insert(level, phases.max(1));
        self
    }

    pub fn phases(&self, level: RunLevel) -> u32 {
        self.phases.get(&level).copied().unwrap_or(1)
    }

    /// Highest level fully brought up, if any.
    pub fn current(&self) -> Option<RunLevel> {
        self.current
    }

    /// Deliver one transition to every participant, skipping replays.
    pub fn switch(&mut self, level: RunLevel, phase: u32, direction: Direction) -> Result<(), HiveError> {
        for (i, participant) in self.participants.iter().enumerate() {
            let key = (i, level, phase);
            let last = self.delivered.get(&key).copied();
            let replay = match direction {
                Direction::Up => last == Some(Direction::Up),
                // Nothing to undo for a phase that never came up.
                Direction::Down => last != Some(Direction::Up),
            };
            if replay {
                debug!(participant = participant.name(), %level, phase, ?direction, "transition already delivered");
                continue;
            }
            participant.switch_runlevel(level, phase, direction)?;
            self.delivered.insert(key, direction);
        }
        Ok(())
    }

    /// Walk every level upward.
    pub fn bring_up(&mut self) -> Result<(), HiveError> {
        self.bring_up_to(RunLevel::UserOk)
    }

    pub fn bring_up_to(&mut self, target: RunLevel) -> Result<(), HiveError> {
        for level in RunLevel::ALL.into_iter().filter(|l| *l <= target) {
            for phase in 0..self.phases(level) {
                self.switch(level, phase, Direction::Up)?;
            }
            self.current = Some(level);
            info!(%level, "runlevel up");
        }
        Ok(())
    }

    /// Walk every level downward, phases in reverse.
    pub fn tear_down(&mut self) -> Result<(), HiveError> {
        for level in RunLevel::ALL.into_iter().rev() {
            for phase in (0..self.phases(level)).rev() {
                self.switch(level, phase, Direction::Down)?;
            }
            self.current = RunLevel::ALL
                .into_iter()
                .take_while(|l| *l < level)
                .last();
            debug!(%level, "runlevel down");
        }
        info!("tear-down complete");
        Ok(())
    }
}

impl Default for RunlevelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(RunLevel, u32, Direction)>>,
    }

    impl RunlevelParticipant for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn switch_runlevel(&self, level: RunLevel, phase: u32, direction: Direction) -> Result<(), HiveError> {
            self.seen.lock().unwrap().push((level, phase, direction));
            Ok(())
        }
    }

    #[test]
    fn bring_up_then_tear_down_in_order() {
        let rec = Arc::new(Recorder::default());
        let mut mgr = RunlevelManager::new().with_phases(RunLevel::MemoryOk, 2);
        mgr.register(rec.clone());

        mgr.bring_up().unwrap();
        assert_eq!(mgr.current(), Some(RunLevel::UserOk));
        mgr.tear_down().unwrap();
        assert_eq!(mgr.current(), None);

        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), 16, "7 levels + 1 extra phase, each way");
        assert_eq!(seen[0], (RunLevel::ConfigParse, 0, Direction::Up));
        assert_eq!(seen[3], (RunLevel::MemoryOk, 0, Direction::Up));
        assert_eq!(seen[4], (RunLevel::MemoryOk, 1, Direction::Up));
        assert_eq!(seen[8], (RunLevel::UserOk, 0, Direction::Down));
        let memory_down: Vec<_> = seen
            .iter()
            .filter(|(l, _, d)| *l == RunLevel::MemoryOk && *d == Direction::Down)
            .map(|(_, p, _)| *p)
            .collect();
        assert_eq!(memory_down, vec![1, 0]);
    }

    #[test]
    fn repeated_transitions_are_noops() {
        let rec = Arc::new(Recorder::default());
        let mut mgr = RunlevelManager::new();
        mgr.register(rec.clone());

        mgr.switch(RunLevel::ComputeOk, 0, Direction::Up).unwrap();
        mgr.switch(RunLevel::ComputeOk, 0, Direction::Up).unwrap();
        mgr.bring_up_to(RunLevel::ComputeOk).unwrap();
        // Down without a prior up is skipped too.
        mgr.switch(RunLevel::UserOk, 0, Direction::Down).unwrap();

        let seen = rec.seen.lock().unwrap();
        let compute_ups = seen
            .iter()
            .filter(|(l, _, d)| *l == RunLevel::ComputeOk && *d == Direction::Up)
            .count();
        assert_eq!(compute_ups, 1);
        assert!(!seen.iter().any(|(l, _, _)| *l == RunLevel::UserOk));
    }

    #[test]
    fn levels_are_ordered() {
        assert!(RunLevel::ConfigParse < RunLevel::MemoryOk);
        assert!(RunLevel::ComputeOk < RunLevel::UserOk);
        assert_eq!(RunLevel::GuidOk.to_string(), "guid-ok");
    }
}
