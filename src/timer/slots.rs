//! Arena of timer slots addressed by stable [`TimerId`]s.
//!
//! The heap only ever holds ids; the slot keeps everything else. A slot is
//! removed when its [`TimerHandle`](super::TimerHandle) is dropped, after it
//! has been unlinked from the heap.

use std::sync::Arc;

use super::deadline::Deadline;
use super::heap::{PositionTracker, TimerId};

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct TimerSlot {
    pub callback: Callback,
    /// Re-arm interval in microseconds; 0 = one-shot.
    pub period: u64,
    /// True iff the slot is not linked into the heap.
    pub expired: bool,
    /// Heap position, meaningful only while `!expired`.
    pub position: usize,
    pub deadline: Deadline,
    /// Token of the current arming; 0 = none. Never reused.
    pub arming: u64,
}

impl TimerSlot {
    pub fn new(callback: Callback) -> Self {
        Self {
            callback,
            period: 0,
            expired: true,
            position: 0,
            deadline: Deadline::ZERO,
            arming: 0,
        }
    }
}

pub(crate) struct TimerSlots {
    slots: Vec<Option<TimerSlot>>,
    free: Vec<u32>,
}

impl TimerSlots {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, slot: TimerSlot) -> TimerId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            return TimerId(index);
        }
        let index = u32::try_from(self.slots.len()).expect("timer arena exhausted");
        debug_assert!(index != TimerId::SENTINEL.0);
        self.slots.push(Some(slot));
        TimerId(index)
    }

    pub fn remove(&mut self, id: TimerId) -> Option<TimerSlot> {
        let slot = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(slot)
    }

    pub fn get(&self, id: TimerId) -> Option<&TimerSlot> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerSlot> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Number of live slots (armed or not).
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl PositionTracker for TimerSlots {
    fn set_position(&mut self, id: TimerId, position: usize) {
        if let Some(slot) = self.get_mut(id) {
            slot.position = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Arc::new(|| {})
    }

    #[test]
    fn test_new_slot_is_expired() {
        let slot = TimerSlot::new(noop());
        assert!(slot.expired);
        assert_eq!(slot.period, 0);
        assert_eq!(slot.arming, 0);
    }

    #[test]
    fn test_ids_are_reused_after_remove() {
        let mut slots = TimerSlots::with_capacity(4);
        let a = slots.insert(TimerSlot::new(noop()));
        let b = slots.insert(TimerSlot::new(noop()));
        assert_ne!(a, b);
        assert_eq!(slots.len(), 2);

        assert!(slots.remove(a).is_some());
        assert!(slots.get(a).is_none());
        assert!(slots.remove(a).is_none());
        assert_eq!(slots.len(), 1);

        let c = slots.insert(TimerSlot::new(noop()));
        assert_eq!(c, a);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_tracker_updates_position() {
        let mut slots = TimerSlots::with_capacity(1);
        let id = slots.insert(TimerSlot::new(noop()));
        slots.set_position(id, 7);
        assert_eq!(slots.get(id).map(|s| s.position), Some(7));
        // unknown ids are ignored
        slots.set_position(TimerId(99), 3);
    }
}
