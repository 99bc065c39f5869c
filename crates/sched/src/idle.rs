//! Idle/ready notification.
//!
//! `take` never blocks. A worker that wants to sleep until work shows up
//! parks on a [`ParkingNotifier`]; the driver tells the notifier when a
//! context came up empty (`idle`) and when a give made work visible
//! (`ready`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use hive_core::Location;

pub trait IdleNotifier: Send + Sync {
    /// `worker` found nothing to take.
    fn idle(&self, worker: Location);
    /// Work became visible. `Some(worker)` names the container it landed in.
    fn ready(&self, worker: Option<Location>);
}

#[derive(Debug, Default)]
struct Parker {
    notified: Mutex<bool>,
    cvar: Condvar,
    idle: AtomicBool,
}

impl Parker {
    fn unpark(&self) {
        let mut notified = self.notified.lock().unwrap_or_else(PoisonError::into_inner);
        *notified = true;
        self.cvar.notify_one();
    }

    fn park_timeout(&self, timeout: Duration) -> bool {
        let guard = self.notified.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut notified, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |n| !*n)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *notified, false)
    }
}

/// One condvar-backed parker per worker.
#[derive(Debug)]
pub struct ParkingNotifier {
    parkers: Vec<Parker>,
}

impl ParkingNotifier {
    pub fn new(workers: usize) -> Self {
        Self {
            parkers: (0..workers).map(|_| Parker::default()).collect(),
        }
    }

    /// Block `worker` until woken or `timeout` elapses. Returns `true` if woken.
    ///
    /// A wake that arrived before the call is consumed immediately.
    pub fn park_timeout(&self, worker: Location, timeout: Duration) -> bool {
        let Some(parker) = self.parkers.get(worker.index()) else {
            return false;
        };
        let woken = parker.park_timeout(timeout);
        parker.idle.store(false, Ordering::Release);
        woken
    }

    pub fn unpark(&self, worker: Location) {
        if let Some(parker) = self.parkers.get(worker.index()) {
            parker.unpark();
        }
    }

    pub fn unpark_all(&self) {
        for parker in &self.parkers {
            parker.unpark();
        }
    }

    pub fn is_idle(&self, worker: Location) -> bool {
        self.parkers
            .get(worker.index())
            .map(|p| p.idle.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn idle_count(&self) -> usize {
        self.parkers
            .iter()
            .filter(|p| p.idle.load(Ordering::Acquire))
            .count()
    }

    fn first_idle(&self, except: Option<usize>) -> Option<&Parker> {
        self.parkers
            .iter()
            .enumerate()
            .find(|(i, p)| Some(*i) != except && p.idle.load(Ordering::Acquire))
            .map(|(_, p)| p)
    }
}

impl IdleNotifier for ParkingNotifier {
    fn idle(&self, worker: Location) {
        if let Some(parker) = self.parkers.get(worker.index()) {
            parker.idle.store(true, Ordering::Release);
        }
    }

    fn ready(&self, worker: Option<Location>) {
        match worker.and_then(|w| self.parkers.get(w.index()).map(|p| (w, p))) {
            Some((w, owner)) => {
                owner.unpark();
                // A busy owner leaves the task to thieves.
                if !owner.idle.load(Ordering::Acquire) {
                    if let Some(thief) = self.first_idle(Some(w.index())) {
                        thief.unpark();
                    }
                }
            }
            None => {
                if let Some(parker) = self.first_idle(None).or_else(|| self.parkers.first()) {
                    parker.unpark();
                }
            }
        }
    }
}
