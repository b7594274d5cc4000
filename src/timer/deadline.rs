//! Absolute deadlines and the monotonic clock they are measured against.

use std::time::{Duration, Instant};

/// An absolute point in time, in microseconds since the owning service's epoch.
///
/// Deadlines are computed once when a timer is armed (`now + interval`) and
/// never re-derived from a relative duration afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Deadline(u64);

impl Deadline {
    /// The service epoch.
    pub const ZERO: Deadline = Deadline(0);

    /// Largest representable deadline. Reserved for the heap sentinel.
    pub const MAX: Deadline = Deadline(u64::MAX);

    pub const fn from_micros(micros: u64) -> Self {
        Deadline(micros)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// `self + micros`, saturating just below the sentinel value.
    pub fn after_micros(self, micros: u64) -> Self {
        Deadline(self.0.saturating_add(micros).min(u64::MAX - 1))
    }

    /// Time left until `self`, seen from `now`. Zero once the deadline has passed.
    pub fn saturating_duration_since(self, now: Deadline) -> Duration {
        Duration::from_micros(self.0.saturating_sub(now.0))
    }
}

/// Monotonic microsecond clock anchored at service start.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Current time as a [`Deadline`].
    pub fn now(&self) -> Deadline {
        let micros = self.epoch.elapsed().as_micros();
        Deadline(u64::try_from(micros).unwrap_or(u64::MAX - 1))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
