//! Arena of thread control blocks.
//!
//! Slots freed by reclaimed threads are chained on an intrusive free list
//! and handed out again by later creations. Each insertion stamps its slot
//! with a fresh process-wide generation.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{Tcb, ThreadRef};
use crate::error::{Error, Result};

// Shared by every table in the process, so handles never repeat across runs
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

enum Slot {
    Occupied { tcb: Tcb, generation: u64 },
    Free { next_free: Option<usize> },
}

pub(crate) struct ThreadTable {
    slots: Vec<Slot>,
    free: Option<usize>,
    live: usize,
}

impl ThreadTable {
    pub const fn new() -> Self {
        ThreadTable {
            slots: Vec::new(),
            free: None,
            live: 0,
        }
    }

    pub fn insert(&mut self, tcb: Tcb) -> Result<ThreadRef> {
        let id = tcb.id;
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let occupied = Slot::Occupied { tcb, generation };
        let slot = match self.free {
            Some(slot) => {
                if let Slot::Free { next_free } = self.slots[slot] {
                    self.free = next_free;
                }
                self.slots[slot] = occupied;
                slot
            }
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| Error::AllocationError("thread control block"))?;
                self.slots.push(occupied);
                self.slots.len() - 1
            }
        };
        self.live += 1;
        Ok(ThreadRef::new(slot, generation, id))
    }

    pub fn get(&self, thread: ThreadRef) -> Option<&Tcb> {
        match self.slots.get(thread.slot()) {
            Some(Slot::Occupied { tcb, generation }) if *generation == thread.generation() => {
                Some(tcb)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, thread: ThreadRef) -> Option<&mut Tcb> {
        match self.slots.get_mut(thread.slot()) {
            Some(Slot::Occupied { tcb, generation }) if *generation == thread.generation() => {
                Some(tcb)
            }
            _ => None,
        }
    }

    pub fn remove(&mut self, thread: ThreadRef) -> Option<Tcb> {
        self.get(thread)?;
        let slot = core::mem::replace(
            &mut self.slots[thread.slot()],
            Slot::Free { next_free: self.free },
        );
        self.free = Some(thread.slot());
        self.live -= 1;
        match slot {
            Slot::Occupied { tcb, .. } => Some(tcb),
            Slot::Free { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadRef, &Tcb)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| match entry {
            Slot::Occupied { tcb, generation } => {
                Some((ThreadRef::new(slot, *generation, tcb.id), tcb))
            }
            Slot::Free { .. } => None,
        })
    }

    // Every handle currently occupying a slot
    pub fn refs(&self) -> Vec<ThreadRef> {
        self.iter().map(|(thread, _)| thread).collect()
    }
}
