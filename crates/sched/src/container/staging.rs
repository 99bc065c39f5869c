//! Shared hand-off point for affinity groups that just became non-empty.
//!
//! A fixed number of slots, each a bounded lock-free FIFO of arena
//! indices. A group goes to slot `key mod slots`; a worker pops from its
//! own slot first and then walks the others round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

use hive_core::{AffinityKey, HiveError};

use crate::arena::ArenaIndex;

pub struct Staging {
    slots: Vec<ArrayQueue<ArenaIndex>>,
    slot_capacity: usize,
    len: AtomicUsize,
}

impl Staging {
    pub fn new(slots: usize, slot_capacity: usize) -> Self {
        let slots = slots.max(1);
        let slot_capacity = slot_capacity.max(1);
        Self {
            slots: (0..slots).map(|_| ArrayQueue::new(slot_capacity)).collect(),
            slot_capacity,
            len: AtomicUsize::new(0),
        }
    }

    pub fn slot_for(&self, key: AffinityKey) -> usize {
        (key.0 % self.slots.len() as u64) as usize
    }

    /// Publish a group. Fails when its slot is full.
    pub fn push(&self, key: AffinityKey, index: ArenaIndex) -> Result<(), HiveError> {
        self.slots[self.slot_for(key)]
            .push(index)
            .map_err(|_| HiveError::CapacityExhausted {
                what: "staging slot",
                capacity: self.slot_capacity,
            })?;
        self.len.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Pop the oldest group, starting at the slot `worker` maps to.
    pub fn pop(&self, worker: usize) -> Option<ArenaIndex> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let n = self.slots.len();
        let start = worker % n;
        for i in 0..n {
            if let Some(index) = self.slots[(start + i) % n].pop() {
                self.len.fetch_sub(1, Ordering::AcqRel);
                return Some(index);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn push_pop_prefers_own_slot() {
        let mut arena = Arena::new();
        let a = arena.insert(());
        let b = arena.insert(());
        let staging = Staging::new(2, 4);

        staging.push(AffinityKey(0), a).unwrap();
        staging.push(AffinityKey(1), b).unwrap();
        assert_eq!(staging.len(), 2);

        assert_eq!(staging.pop(1), Some(b), "worker 1 drains slot 1 first");
        assert_eq!(staging.pop(1), Some(a), "then walks to slot 0");
        assert_eq!(staging.pop(1), None);
        assert!(staging.is_empty());
    }

    #[test]
    fn full_slot_reports_capacity() {
        let mut arena = Arena::new();
        let staging = Staging::new(1, 1);
        staging.push(AffinityKey(5), arena.insert(())).unwrap();
        let err = staging.push(AffinityKey(6), arena.insert(())).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(staging.len(), 1);

        assert!(staging.pop(0).is_some());
        staging.push(AffinityKey(6), arena.insert(())).unwrap();
        assert_eq!(staging.len(), 1, "a drained slot takes groups again");
    }
}
