//! Per-connection session and its statement timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::timer::{TimerHandle, TimerService};

/// Kill flag shared between a session and its timer callback.
#[derive(Debug, Default)]
pub struct KillSignal {
    killed: AtomicBool,
    wake: Notify,
}

impl KillSignal {
    /// Mark the running statement as killed by timeout and wake it.
    pub fn awake(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.killed.store(false, Ordering::SeqCst);
    }
}

/// Timer callback: kill the statement and count it.
fn kill_timeout(kill: &KillSignal, exceeded: &AtomicU64) {
    exceeded.fetch_add(1, Ordering::Relaxed);
    kill.awake();
}

pub struct Session {
    pub id: u32,
    /// Statement time limit in milliseconds (0 = unlimited)
    pub max_statement_time_ms: u64,
    kill: Arc<KillSignal>,
    query_timer: TimerHandle,
}

impl Session {
    /// `exceeded` is the server-wide `max_statement_time_exceeded` counter.
    pub fn new(
        id: u32,
        timers: &TimerService,
        max_statement_time_ms: u64,
        exceeded: Arc<AtomicU64>,
    ) -> Self {
        let kill = Arc::new(KillSignal::default());
        let cb_kill = Arc::clone(&kill);
        let query_timer = timers.create_timer(move || kill_timeout(&cb_kill, &exceeded));
        Self {
            id,
            max_statement_time_ms,
            kill,
            query_timer,
        }
    }

    /// Arm the statement timer.
    ///
    /// Does nothing when no limit is set or a timer is already running.
    /// Returns whether the limit is enforced for this statement.
    pub fn set_query_timer(&self) -> bool {
        if self.max_statement_time_ms == 0 || !self.query_timer.is_expired() {
            return false;
        }
        match self
            .query_timer
            .arm(self.max_statement_time_ms.saturating_mul(1000))
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "[query] [timeout_not_enforced] session={} limit_ms={} error={}",
                    self.id,
                    self.max_statement_time_ms,
                    e
                );
                false
            }
        }
    }

    /// Cancel the statement timer if it has not fired.
    pub fn reset_query_timer(&self) {
        if !self.query_timer.is_expired() {
            self.query_timer.disarm();
        }
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    /// Run a statement lasting `ms` milliseconds under the session's limit.
    ///
    /// Returns `false` when the statement was killed by its timer.
    pub async fn run_statement(&self, ms: u64) -> bool {
        self.kill.reset();
        self.set_query_timer();

        let completed = self.sleep_unless_killed(Duration::from_millis(ms)).await;

        self.reset_query_timer();
        if !completed {
            tracing::info!(
                "[query] [killed] session={} limit_ms={}",
                self.id,
                self.max_statement_time_ms
            );
        }
        completed
    }

    async fn sleep_unless_killed(&self, duration: Duration) -> bool {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            if self.kill.is_killed() {
                return false;
            }
            tokio::select! {
                _ = &mut sleep => return true,
                _ = self.kill.wake.notified() => {}
            }
        }
    }
}
