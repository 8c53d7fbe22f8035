// Deferred destruction queue
//
// One FIFO per frame slot. Destroying a resource never frees it right away:
// the object (or a custom teardown closure) is appended to the queue of the
// slot that is currently recording. The frame loop drains a slot's queue only
// after that slot's fence has signaled, so nothing the device may still read
// is released early.

use std::fmt;

use crate::backend::Backend;
use crate::frame::FrameSlot;
use crate::registry::RawResource;

/// Bespoke teardown run at drain time with the backend.
pub type FreeFn<B> = Box<dyn FnOnce(&mut B)>;

/// One pending destruction.
pub enum FreeEntry<B: Backend> {
    Resource(RawResource<B>),
    Custom(FreeFn<B>),
}

impl<B: Backend> fmt::Debug for FreeEntry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeEntry::Resource(raw) => write!(f, "FreeEntry::Resource({:?})", raw.kind()),
            FreeEntry::Custom(_) => f.write_str("FreeEntry::Custom"),
        }
    }
}

pub struct FreeQueue<B: Backend> {
    slots: Vec<Vec<FreeEntry<B>>>,
    drains: Vec<u64>,
}

impl<B: Backend> FreeQueue<B> {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: (0..frames_in_flight).map(|_| Vec::new()).collect(),
            drains: vec![0; frames_in_flight],
        }
    }

    /// Queue `entry` behind everything already pending for `slot`.
    pub fn submit(&mut self, slot: FrameSlot, entry: FreeEntry<B>) {
        self.slots[slot.index()].push(entry);
    }

    /// Run every entry queued for `slot`, oldest first. Returns how many ran.
    ///
    /// The caller must have confirmed that the slot's previous submission
    /// finished executing.
    pub fn drain(&mut self, slot: FrameSlot, backend: &mut B) -> usize {
        let entries = std::mem::take(&mut self.slots[slot.index()]);
        self.drains[slot.index()] += 1;

        let count = entries.len();
        for entry in entries {
            match entry {
                FreeEntry::Resource(raw) => backend.destroy(raw),
                FreeEntry::Custom(free) => free(backend),
            }
        }
        count
    }

    /// Teardown path: drain every slot in slot order. Only valid after a
    /// full device idle wait.
    pub fn drain_all(&mut self, backend: &mut B) -> usize {
        (0..self.slots.len())
            .map(|index| self.drain(FrameSlot::new(index), backend))
            .sum()
    }

    pub fn pending(&self, slot: FrameSlot) -> usize {
        self.slots[slot.index()].len()
    }

    /// Number of times `slot` has been drained.
    pub fn drain_count(&self, slot: FrameSlot) -> u64 {
        self.drains[slot.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}
