// Clock - monotonic time source with interruptible waits
//
// The scheduler and the bus reconnect loop never call thread::sleep directly;
// they wait on a Clock with a StopSignal so a stop request cuts the wait short.
// Tests swap in ManualClock to run timing loops without real sleeps.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag that also wakes blocked waiters
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter
    pub fn raise(&self) {
        let (flag, cvar) = &*self.inner;
        *lock(flag) = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Block for up to `timeout`; returns true if the signal was raised
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = lock(flag);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Block until the signal is raised
    pub fn wait(&self) {
        let (flag, cvar) = &*self.inner;
        let guard = lock(flag);
        let _guard = cvar
            .wait_while(guard, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Stopped,
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time since the clock's own epoch
    fn now(&self) -> Duration;

    /// Block until `now() >= deadline` or `stop` is raised
    fn wait_until(&self, deadline: Duration, stop: &StopSignal) -> WaitOutcome;

    fn wait_for(&self, duration: Duration, stop: &StopSignal) -> WaitOutcome {
        self.wait_until(self.now() + duration, stop)
    }
}

/// Wall-clock implementation on `Instant`
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn wait_until(&self, deadline: Duration, stop: &StopSignal) -> WaitOutcome {
        loop {
            if stop.is_raised() {
                return WaitOutcome::Stopped;
            }
            let remaining = deadline.saturating_sub(self.now());
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }
            // Condvar waits may wake spuriously; loop re-checks the deadline
            if stop.wait_timeout(remaining) {
                return WaitOutcome::Stopped;
            }
        }
    }
}

struct ManualState {
    now: Duration,
    deadlines: Vec<Duration>,
    budget: Option<usize>,
}

/// Virtual clock for tests
///
/// Each wait jumps virtual time straight to its deadline and records it. With
/// a budget, once the budget is spent further waits park until stopped, which
/// freezes a timing loop at a known point.
pub struct ManualClock {
    state: Mutex<ManualState>,
    waited: Condvar,
}

impl ManualClock {
    /// Clock that never parks
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    /// Clock that completes `waits` waits, then parks
    pub fn with_budget(waits: usize) -> Self {
        Self::build(Some(waits))
    }

    fn build(budget: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                deadlines: Vec::new(),
                budget,
            }),
            waited: Condvar::new(),
        }
    }

    /// Deadlines passed to `wait_until`, in call order
    pub fn deadlines(&self) -> Vec<Duration> {
        lock(&self.state).deadlines.clone()
    }

    /// Gaps between successive deadlines, starting from time zero
    pub fn intervals(&self) -> Vec<Duration> {
        let deadlines = self.deadlines();
        let mut previous = Duration::ZERO;
        deadlines
            .into_iter()
            .map(|deadline| {
                let gap = deadline.saturating_sub(previous);
                previous = deadline;
                gap
            })
            .collect()
    }

    /// Block (in real time, up to `timeout`) until at least `count` waits
    /// were recorded
    pub fn wait_for_waits(&self, count: usize, timeout: Duration) -> bool {
        let guard = lock(&self.state);
        let (guard, _) = self
            .waited
            .wait_timeout_while(guard, timeout, |state| state.deadlines.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.deadlines.len() >= count
    }

    pub fn advance(&self, by: Duration) {
        lock(&self.state).now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        lock(&self.state).now
    }

    fn wait_until(&self, deadline: Duration, stop: &StopSignal) -> WaitOutcome {
        if stop.is_raised() {
            return WaitOutcome::Stopped;
        }

        {
            let mut state = lock(&self.state);
            if state.budget == Some(0) {
                drop(state);
                stop.wait();
                return WaitOutcome::Stopped;
            }
            if let Some(budget) = state.budget.as_mut() {
                *budget -= 1;
            }
            state.deadlines.push(deadline);
            state.now = state.now.max(deadline);
        }
        self.waited.notify_all();

        if stop.is_raised() {
            WaitOutcome::Stopped
        } else {
            WaitOutcome::Elapsed
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
