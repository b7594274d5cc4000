//! Caller-owned timer handle.

use std::sync::Arc;

use super::deadline::Deadline;
use super::heap::TimerId;
use super::service::Shared;
use super::TimerError;

/// A timer created by [`TimerService::create_timer`](super::TimerService::create_timer).
///
/// The handle starts expired and may be armed and disarmed any number of
/// times. Arming an already armed handle is a caller bug (debug assertion).
/// Dropping the handle disarms it first, so it can be destroyed at any time,
/// including from inside its own callback.
pub struct TimerHandle {
    shared: Arc<Shared>,
    id: TimerId,
}

impl TimerHandle {
    pub(crate) fn new(shared: Arc<Shared>, id: TimerId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Re-arm interval in microseconds for subsequent arms; 0 = one-shot.
    pub fn set_period(&self, micros: u64) {
        self.shared.set_period(self.id, micros);
    }

    pub fn period(&self) -> u64 {
        self.shared.period(self.id)
    }

    /// Fire after `micros` microseconds, measured from now.
    ///
    /// On error the handle stays expired and the timeout is simply not
    /// enforced.
    pub fn arm(&self, micros: u64) -> Result<(), TimerError> {
        self.shared.arm(self.id, micros)
    }

    /// Cancel the pending firing. No-op on an expired handle.
    ///
    /// Once this returns the current arming will not fire, and a periodic
    /// timer whose callback is running right now will not be rescheduled.
    pub fn disarm(&self) {
        self.shared.disarm(self.id);
    }

    /// True iff the handle is not linked into the heap.
    pub fn is_expired(&self) -> bool {
        self.shared.is_expired(self.id)
    }

    /// Absolute deadline of the pending firing.
    pub fn deadline(&self) -> Option<Deadline> {
        self.shared.deadline(self.id)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.shared.destroy(self.id);
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("expired", &self.is_expired())
            .finish()
    }
}
