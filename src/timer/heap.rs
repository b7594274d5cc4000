//! Bounded binary min-heap of timer ids keyed by absolute deadline.
//!
//! The heap always holds a sentinel node carrying [`Deadline::MAX`], so
//! [`DeadlineHeap::peek_min`] is defined even with no timers armed. Every
//! node move is reported to a [`PositionTracker`]; that stored position is
//! what makes [`DeadlineHeap::remove_at`] (used by disarm) O(log n).

use super::deadline::Deadline;
use super::TimerError;

/// Stable id of a timer slot in the service arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u32);

impl TimerId {
    /// Id carried by the permanent sentinel node.
    pub const SENTINEL: TimerId = TimerId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Receives the new heap position of every node the heap moves.
pub trait PositionTracker {
    fn set_position(&mut self, id: TimerId, position: usize);
}

/// One heap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapNode {
    pub deadline: Deadline,
    /// Insertion stamp; breaks ties between equal deadlines in arming order.
    pub seq: u64,
    pub id: TimerId,
}

impl HeapNode {
    fn key(&self) -> (Deadline, u64) {
        (self.deadline, self.seq)
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == TimerId::SENTINEL
    }
}

const SENTINEL_NODE: HeapNode = HeapNode {
    deadline: Deadline::MAX,
    seq: u64::MAX,
    id: TimerId::SENTINEL,
};

#[derive(Debug)]
pub struct DeadlineHeap {
    nodes: Vec<HeapNode>,
    /// Slot limit including the sentinel.
    limit: usize,
    /// Slots added when the limit is hit; 0 keeps the heap fixed-size.
    growth_step: usize,
    next_seq: u64,
}

impl DeadlineHeap {
    /// Heap sized for `capacity_hint` timers plus the sentinel.
    pub fn new(capacity_hint: usize, growth_step: usize) -> Self {
        let limit = capacity_hint.saturating_add(1);
        let mut nodes = Vec::with_capacity(limit);
        nodes.push(SENTINEL_NODE);
        Self {
            nodes,
            limit,
            growth_step,
            next_seq: 0,
        }
    }

    /// Number of armed timers (sentinel excluded).
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of timers the heap can hold before growing or refusing.
    pub fn capacity(&self) -> usize {
        self.limit - 1
    }

    /// Current minimum; the sentinel when nothing is armed.
    pub fn peek_min(&self) -> &HeapNode {
        &self.nodes[0]
    }

    /// Insert `id` at `deadline`. Returns the node's heap position.
    ///
    /// A full fixed-size heap returns [`TimerError::QueueFull`] and is left
    /// untouched.
    pub fn insert<T: PositionTracker>(
        &mut self,
        id: TimerId,
        deadline: Deadline,
        tracker: &mut T,
    ) -> Result<usize, TimerError> {
        debug_assert!(id != TimerId::SENTINEL);
        if self.nodes.len() >= self.limit {
            if self.growth_step == 0 {
                return Err(TimerError::QueueFull {
                    capacity: self.capacity(),
                });
            }
            self.limit = self.limit.saturating_add(self.growth_step);
            self.nodes.reserve(self.growth_step);
            tracing::warn!(
                "[timer] [heap_grow] capacity={} step={}",
                self.capacity(),
                self.growth_step
            );
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.nodes.push(HeapNode { deadline, seq, id });
        let last = self.nodes.len() - 1;
        Ok(self.sift_up(last, tracker))
    }

    /// Pop the minimum. Never pops the sentinel.
    pub fn remove_min<T: PositionTracker>(&mut self, tracker: &mut T) -> Option<HeapNode> {
        self.remove_at(0, tracker)
    }

    /// Remove the node at `position`. Returns `None` for the sentinel or an
    /// out-of-range position.
    pub fn remove_at<T: PositionTracker>(
        &mut self,
        position: usize,
        tracker: &mut T,
    ) -> Option<HeapNode> {
        if position >= self.nodes.len() || self.nodes[position].is_sentinel() {
            return None;
        }

        let removed = self.nodes.swap_remove(position);
        if position < self.nodes.len() {
            let parent_is_greater =
                position > 0 && self.nodes[position].key() < self.nodes[(position - 1) / 2].key();
            if parent_is_greater {
                self.sift_up(position, tracker);
            } else {
                self.sift_down(position, tracker);
            }
        }
        Some(removed)
    }

    /// Unlink every armed timer, keeping only the sentinel.
    pub fn clear(&mut self) -> Vec<TimerId> {
        let ids = self
            .nodes
            .drain(..)
            .filter(|n| !n.is_sentinel())
            .map(|n| n.id)
            .collect();
        self.nodes.push(SENTINEL_NODE);
        ids
    }

    /// Node stored at `position`, if any.
    pub fn get(&self, position: usize) -> Option<&HeapNode> {
        self.nodes.get(position)
    }

    /// Check the min-heap property and sentinel presence.
    pub fn is_valid(&self) -> bool {
        let sentinels = self.nodes.iter().filter(|n| n.is_sentinel()).count();
        if sentinels != 1 {
            return false;
        }
        (1..self.nodes.len()).all(|i| self.nodes[(i - 1) / 2].key() <= self.nodes[i].key())
    }

    fn sift_up<T: PositionTracker>(&mut self, mut pos: usize, tracker: &mut T) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.nodes[parent].key() <= self.nodes[pos].key() {
                break;
            }
            self.nodes.swap(parent, pos);
            self.report(pos, tracker);
            pos = parent;
        }
        self.report(pos, tracker);
        pos
    }

    fn sift_down<T: PositionTracker>(&mut self, mut pos: usize, tracker: &mut T) -> usize {
        let len = self.nodes.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.nodes[right].key() < self.nodes[left].key() {
                right
            } else {
                left
            };
            if self.nodes[pos].key() <= self.nodes[child].key() {
                break;
            }
            self.nodes.swap(pos, child);
            self.report(pos, tracker);
            pos = child;
        }
        self.report(pos, tracker);
        pos
    }

    fn report<T: PositionTracker>(&self, pos: usize, tracker: &mut T) {
        let node = &self.nodes[pos];
        if !node.is_sentinel() {
            tracker.set_position(node.id, pos);
        }
    }
}
