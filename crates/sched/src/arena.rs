//! Index-based arena with a free list.
//!
//! Containers refer to arena entries by [`ArenaIndex`] instead of owning
//! pointers. An index carries the slot generation, so a stale index left
//! behind after a slot is freed and reused resolves to `None`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// O(1) insert, reusing a freed slot when one is available.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return ArenaIndex {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ArenaIndex { slot, generation: 0 }
    }

    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        self.slots
            .get(index.slot())
            .filter(|s| s.generation == index.generation)
            .and_then(|s| s.value.as_ref())
    }

    /// Free the slot and bump its generation so outstanding indices go stale.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.slots.get_mut(index.slot())?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    ArenaIndex {
                        slot: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
