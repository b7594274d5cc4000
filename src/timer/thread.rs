//! The timer thread: sleep until the earliest deadline, fire everything
//! due, reschedule periodic timers, repeat until shutdown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard, PoisonError};

use super::deadline::Deadline;
use super::heap::TimerId;
use super::service::{Shared, TimerState};

pub(crate) fn run(shared: Arc<Shared>) {
    tracing::info!("[timer] [thread_started]");

    let mut state = shared.lock();
    while state.running {
        let now = shared.clock.now();
        if state.heap.peek_min().deadline <= now {
            state = process_timers(&shared, state, now);
            // shutdown may have been signalled while a callback ran
            if !state.running {
                break;
            }
        }

        let next = state.heap.peek_min().deadline;
        state.next_wake = next;

        state = if next == Deadline::MAX {
            shared
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            let timeout = next.saturating_duration_since(shared.clock.now());
            shared
                .wakeup
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0
        };
    }
    drop(state);

    tracing::info!("[timer] [thread_stopped]");
}

/// Fire every timer due at `now`. The lock is released around each callback.
fn process_timers<'a>(
    shared: &'a Shared,
    mut state: MutexGuard<'a, TimerState>,
    now: Deadline,
) -> MutexGuard<'a, TimerState> {
    while state.heap.peek_min().deadline <= now {
        let guard = &mut *state;
        let Some(node) = guard.heap.remove_min(&mut guard.slots) else {
            break;
        };
        let Some(slot) = guard.slots.get_mut(node.id) else {
            continue;
        };
        slot.expired = true;
        let callback = Arc::clone(&slot.callback);
        let period = slot.period;
        let token = slot.arming;
        guard.stats.fired += 1;
        drop(state);

        tracing::trace!(
            "[timer] [fire] timer={} deadline={} late_us={}",
            node.id.0,
            node.deadline.as_micros(),
            now.as_micros().saturating_sub(node.deadline.as_micros())
        );
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            tracing::error!("[timer] [callback_panicked] timer={}", node.id.0);
        }
        // captures may own timer handles; release them unlocked
        drop(callback);

        state = shared.lock();
        if !state.running {
            break;
        }
        if period != 0 {
            reschedule(&mut state, node.id, token, now.after_micros(period));
        }
    }
    state
}

/// Re-link a periodic timer unless its arming was cancelled, replaced, or
/// the handle was dropped while the callback ran.
fn reschedule(state: &mut TimerState, id: TimerId, token: u64, deadline: Deadline) {
    let still_current = state
        .slots
        .get(id)
        .map(|s| s.expired && token != 0 && s.arming == token)
        .unwrap_or(false);
    if !still_current {
        return;
    }
    if let Err(e) = state.link(id, deadline) {
        tracing::warn!("[timer] [reschedule_failed] timer={} error={}", id.0, e);
    }
}
