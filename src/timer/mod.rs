//! Timer service
//!
//! One-shot and periodic timers with microsecond absolute deadlines, served
//! by a single dedicated thread sleeping on a condition variable until the
//! earliest deadline in a binary min-heap.
//!
//! ```no_run
//! use thrtimer::timer::TimerService;
//!
//! let service = TimerService::with_capacity(64).expect("timer thread");
//! let timer = service.create_timer(|| println!("statement timed out"));
//! if let Err(e) = timer.arm(30_000_000) {
//!     eprintln!("timeout not enforced: {e}");
//! }
//! timer.disarm();
//! service.shutdown();
//! ```

pub mod deadline;
pub mod handle;
pub mod heap;
pub mod service;
mod slots;
mod thread;

pub use deadline::{Deadline, MonotonicClock};
pub use handle::TimerHandle;
pub use heap::TimerId;
pub use service::{TimerService, TimerStats};

/// Errors surfaced by the timer service.
///
/// None of these are fatal to the caller: a failed arm means the requested
/// timeout is simply not enforced.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("Timer queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Timer service is not running")]
    ServiceStopped,

    #[error("Failed to spawn timer thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}
