//! Timer service lifecycle and the arm/disarm critical sections.
//!
//! All heap mutation and every `expired` flag change happen under the one
//! service mutex. Application threads only hold it for an O(log n),
//! I/O-free section; the timer thread holds it except while waiting on the
//! condition variable and while a callback runs.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use super::deadline::{Deadline, MonotonicClock};
use super::handle::TimerHandle;
use super::heap::{DeadlineHeap, TimerId};
use super::slots::{Callback, TimerSlot, TimerSlots};
use super::{thread, TimerError};
use crate::config::TimerConfig;

/// Snapshot of service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Timers currently linked into the heap.
    pub armed: usize,
    /// High-water mark of `armed`.
    pub max_armed: usize,
    /// Heap capacity (sentinel excluded).
    pub capacity: usize,
    /// Live handles, armed or not.
    pub timers: usize,
    /// Callbacks invoked so far.
    pub fired: u64,
    /// Arms refused because the heap was full or the service stopped.
    pub arm_failures: u64,
}

pub(crate) struct TimerState {
    pub heap: DeadlineHeap,
    pub slots: TimerSlots,
    /// Deadline the timer thread is currently sleeping towards.
    pub next_wake: Deadline,
    pub running: bool,
    next_arming: u64,
    pub stats: TimerStats,
}

impl TimerState {
    fn new(config: &TimerConfig) -> Self {
        Self {
            heap: DeadlineHeap::new(config.capacity, config.growth_step),
            slots: TimerSlots::with_capacity(config.capacity),
            next_wake: Deadline::MAX,
            running: true,
            next_arming: 1,
            stats: TimerStats::default(),
        }
    }

    fn next_arming_token(&mut self) -> u64 {
        let token = self.next_arming;
        self.next_arming += 1;
        token
    }

    /// Link `id` into the heap at `deadline`. On failure the slot is left
    /// expired with no arming.
    pub fn link(&mut self, id: TimerId, deadline: Deadline) -> Result<(), TimerError> {
        let TimerState { heap, slots, stats, .. } = self;
        if let Some(slot) = slots.get_mut(id) {
            slot.expired = false;
            slot.deadline = deadline;
        }
        match heap.insert(id, deadline, slots) {
            Ok(_) => {
                stats.max_armed = stats.max_armed.max(heap.len());
                Ok(())
            }
            Err(e) => {
                if let Some(slot) = slots.get_mut(id) {
                    slot.expired = true;
                    slot.arming = 0;
                }
                stats.arm_failures += 1;
                Err(e)
            }
        }
    }

    /// Remove `id` from the heap if it is linked.
    fn unlink(&mut self, id: TimerId) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        // Also cancels the reschedule of a periodic firing in progress.
        slot.arming = 0;
        if slot.expired {
            return;
        }
        slot.expired = true;
        let position = slot.position;
        let removed = self.heap.remove_at(position, &mut self.slots);
        debug_assert_eq!(removed.map(|n| n.id), Some(id));
    }
}

pub(crate) struct Shared {
    pub state: Mutex<TimerState>,
    pub wakeup: Condvar,
    pub clock: MonotonicClock,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, callback: Callback) -> TimerId {
        self.lock().slots.insert(TimerSlot::new(callback))
    }

    pub fn set_period(&self, id: TimerId, micros: u64) {
        if let Some(slot) = self.lock().slots.get_mut(id) {
            slot.period = micros;
        }
    }

    pub fn arm(&self, id: TimerId, micros: u64) -> Result<(), TimerError> {
        let deadline = self.clock.now().after_micros(micros);
        let mut state = self.lock();

        if !state.running {
            state.stats.arm_failures += 1;
            let e = TimerError::ServiceStopped;
            tracing::warn!(
                "[timer] [arm_failed] timer={} micros={} error={}",
                id.0,
                micros,
                e
            );
            return Err(e);
        }

        let expired = state.slots.get(id).map(|s| s.expired).unwrap_or(true);
        debug_assert!(expired, "timer {:?} armed while already armed", id);
        if !expired {
            state.unlink(id);
        }

        let token = state.next_arming_token();
        if let Some(slot) = state.slots.get_mut(id) {
            slot.arming = token;
        }

        if let Err(e) = state.link(id, deadline) {
            tracing::warn!(
                "[timer] [arm_failed] timer={} micros={} error={}",
                id.0,
                micros,
                e
            );
            return Err(e);
        }

        tracing::trace!(
            "[timer] [armed] timer={} deadline={}",
            id.0,
            deadline.as_micros()
        );

        if deadline < state.next_wake {
            state.next_wake = deadline;
            self.wakeup.notify_one();
        }
        Ok(())
    }

    pub fn disarm(&self, id: TimerId) {
        self.lock().unlink(id);
    }

    pub fn destroy(&self, id: TimerId) {
        let mut state = self.lock();
        state.unlink(id);
        let slot = state.slots.remove(id);
        drop(state);
        // captures may own timer handles; release them unlocked
        drop(slot);
    }

    pub fn is_expired(&self, id: TimerId) -> bool {
        self.lock().slots.get(id).map(|s| s.expired).unwrap_or(true)
    }

    pub fn period(&self, id: TimerId) -> u64 {
        self.lock().slots.get(id).map(|s| s.period).unwrap_or(0)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Deadline> {
        self.lock()
            .slots
            .get(id)
            .filter(|s| !s.expired)
            .map(|s| s.deadline)
    }
}

/// Process-scoped timer service: the heap, its mutex and condition variable,
/// and the dedicated timer thread.
///
/// Owners create timers through the service and keep the returned
/// [`TimerHandle`]; several independent services can coexist.
pub struct TimerService {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Allocate the heap and start the timer thread.
    ///
    /// Fails only if the thread cannot be spawned, in which case everything
    /// allocated here is released again.
    pub fn init(config: &TimerConfig) -> Result<Self, TimerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::new(config)),
            wakeup: Condvar::new(),
            clock: MonotonicClock::new(),
        });

        let mut builder = std::thread::Builder::new().name(config.thread_name.replace('\0', ""));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker = Arc::clone(&shared);
        let join = match builder.spawn(move || thread::run(worker)) {
            Ok(join) => join,
            Err(e) => {
                tracing::error!("[timer] [init_failed] error={}", e);
                return Err(TimerError::ThreadSpawn(e));
            }
        };

        tracing::info!(
            "[timer] [init] capacity={} growth_step={}",
            config.capacity,
            config.growth_step
        );

        Ok(Self {
            shared,
            thread: Mutex::new(Some(join)),
        })
    }

    /// [`TimerService::init`] with default settings and the given capacity.
    pub fn with_capacity(capacity_hint: usize) -> Result<Self, TimerError> {
        Self::init(&TimerConfig {
            capacity: capacity_hint,
            ..TimerConfig::default()
        })
    }

    /// Create an unarmed timer invoking `callback` on every firing.
    ///
    /// The service owns `callback` until the handle is dropped, so a callback
    /// that strongly captures its own handle (or anything owning it) forms a
    /// reference cycle and is never freed. Capture a `Weak` to reach the
    /// handle from its callback.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX - 1` handles are alive at once.
    pub fn create_timer<F>(&self, callback: F) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.register(Arc::new(callback));
        TimerHandle::new(Arc::clone(&self.shared), id)
    }

    /// Create an unarmed timer invoking `callback(&arg)` on every firing.
    pub fn create_timer_with<T>(&self, arg: T, callback: fn(&T)) -> TimerHandle
    where
        T: Send + Sync + 'static,
    {
        self.create_timer(move || callback(&arg))
    }

    /// Stop the timer thread and unlink every armed timer.
    ///
    /// Idempotent; blocks until the thread has exited.
    pub fn shutdown(&self) {
        let join = {
            let mut running = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
            match running.take() {
                Some(join) => join,
                None => return,
            }
        };

        {
            let mut state = self.shared.lock();
            state.running = false;
            self.shared.wakeup.notify_one();
        }

        // Dropping the last owner from inside a callback must not self-join.
        if join.thread().id() != std::thread::current().id() && join.join().is_err() {
            tracing::error!("[timer] [shutdown] timer thread panicked");
        }

        let mut state = self.shared.lock();
        let TimerState { heap, slots, .. } = &mut *state;
        let unlinked = heap.clear();
        for id in &unlinked {
            if let Some(slot) = slots.get_mut(*id) {
                slot.expired = true;
                slot.arming = 0;
            }
        }
        state.next_wake = Deadline::MAX;
        tracing::info!("[timer] [shutdown] unlinked={}", unlinked.len());
    }

    /// True until [`TimerService::shutdown`] runs.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn stats(&self) -> TimerStats {
        let state = self.shared.lock();
        TimerStats {
            armed: state.heap.len(),
            capacity: state.heap.capacity(),
            timers: state.slots.len(),
            ..state.stats
        }
    }

    /// Current service time.
    pub fn now(&self) -> Deadline {
        self.shared.clock.now()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_init_and_shutdown_without_timers() {
        let service = TimerService::with_capacity(4).unwrap();
        assert!(service.is_running());
        service.shutdown();
        assert!(!service.is_running());
        // second call is a no-op
        service.shutdown();
    }

    #[test]
    fn test_new_handle_is_expired() {
        let service = TimerService::with_capacity(4).unwrap();
        let timer = service.create_timer(|| {});
        assert!(timer.is_expired());
        assert_eq!(timer.period(), 0);
        assert!(timer.deadline().is_none());
        assert_eq!(service.stats().timers, 1);
    }

    #[test]
    fn test_arm_and_disarm_update_state() {
        let service = TimerService::with_capacity(4).unwrap();
        let timer = service.create_timer(|| {});

        timer.arm(60_000_000).unwrap();
        assert!(!timer.is_expired());
        assert!(timer.deadline().unwrap() > service.now());
        assert_eq!(service.stats().armed, 1);

        timer.disarm();
        assert!(timer.is_expired());
        assert_eq!(service.stats().armed, 0);

        // idempotent
        timer.disarm();
        assert!(timer.is_expired());
    }

    #[test]
    fn test_arm_after_shutdown_fails_open() {
        let service = TimerService::with_capacity(4).unwrap();
        let timer = service.create_timer(|| {});
        service.shutdown();

        let err = timer.arm(1_000).unwrap_err();
        assert!(matches!(err, TimerError::ServiceStopped));
        assert!(timer.is_expired());
        assert_eq!(service.stats().arm_failures, 1);
    }

    #[test]
    fn test_shutdown_unlinks_armed_timers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let service = TimerService::with_capacity(4).unwrap();
        let f = Arc::clone(&fired);
        let timer = service.create_timer(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm(60_000_000).unwrap();

        service.shutdown();
        assert!(timer.is_expired());
        assert_eq!(service.stats().armed, 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropping_armed_handle_unlinks_it() {
        let service = TimerService::with_capacity(4).unwrap();
        let timer = service.create_timer(|| {});
        timer.arm(60_000_000).unwrap();
        drop(timer);

        let stats = service.stats();
        assert_eq!(stats.armed, 0);
        assert_eq!(stats.timers, 0);
    }

    #[test]
    fn test_create_timer_with_argument() {
        let service = TimerService::with_capacity(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = service.create_timer_with(Arc::clone(&counter), |c| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm(0).unwrap();

        let start = std::time::Instant::now();
        while counter.load(Ordering::SeqCst) == 0 && start.elapsed().as_secs() < 5 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(timer.is_expired());
    }
}
