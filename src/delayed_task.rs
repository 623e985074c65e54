//! A cancellable, fire-once timer.
//!
//! `cancel` either succeeds and guarantees the callback will not run, or
//! reports that the callback is already running or has completed. Built the
//! way a `Mutex`-guarded wait-with-timeout is built elsewhere in this crate:
//! a state machine parked on a `Condvar` via `wait_timeout`, where the
//! condition is "has someone cancelled me" and the expiry is the delay
//! itself.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::lock_policy::lock_poisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Scheduled,
    Cancelled,
    Fired,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<TaskState>,
    cond: Condvar,
}

/// A cancellable handle to a task scheduled to run once after a delay.
///
/// A `Scheduled -> Firing -> Done` / `Scheduled -> Cancelled` state machine:
/// [`DelayedTask::cancel`] only ever wins the race while the task is still
/// `Scheduled`; once the background thread has moved it to `Fired` the
/// action always runs to completion.
#[derive(Debug, Clone)]
pub(crate) struct DelayedTask {
    inner: Arc<Inner>,
}

impl DelayedTask {
    /// Schedules `action` to run on a dedicated background thread after
    /// `delay`, unless cancelled first.
    pub(crate) fn schedule<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = Arc::new(Inner {
            state: Mutex::new(TaskState::Scheduled),
            cond: Condvar::new(),
        });
        let worker = Arc::clone(&inner);
        thread::spawn(move || {
            let mut guard = lock_poisoned(worker.state.lock());
            loop {
                if *guard != TaskState::Scheduled {
                    return;
                }
                let (g, timeout) = lock_poisoned(worker.cond.wait_timeout(guard, delay));
                guard = g;
                if timeout.timed_out() {
                    break;
                }
                // Spurious or cancellation-notify wake; loop re-checks state.
            }
            if *guard != TaskState::Scheduled {
                return;
            }
            *guard = TaskState::Fired;
            drop(guard);
            action();
        });
        Self { inner }
    }

    /// Attempts to cancel the task before it fires.
    ///
    /// Returns `true` if cancellation succeeded (the action will never run
    /// and its captured buffer is dropped here). Returns `false` if the
    /// task has already started or finished firing; the caller must leave
    /// it alone, as the task removes itself from any bookkeeping list on
    /// its own.
    pub(crate) fn cancel(&self) -> bool {
        let mut guard = lock_poisoned(self.inner.state.lock());
        if *guard == TaskState::Scheduled {
            *guard = TaskState::Cancelled;
            drop(guard);
            self.inner.cond.notify_all();
            true
        } else {
            false
        }
    }
}
