//! Per-open session state: timeouts and the deferred-write bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::delayed_task::DelayedTask;
use crate::error::BrokerError;
use crate::lock_policy::lock_poisoned;

/// Stable, `Copy` handle returned by [`crate::Broker::open`].
///
/// A kernel `struct file *` cannot go stale the way a small integer handle
/// can once its session is closed; [`crate::BrokerError::InvalidHandle`] is
/// the ambient counterpart needed to report that case to a library caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub(crate) u64);

/// The three control commands a session accepts.
///
/// A closed enum means `control` is error-free by construction for any
/// typed caller; [`crate::BrokerError::BadCmd`] is only reachable through
/// [`crate::Broker::control_raw`], which exists to keep the "three distinct
/// opaque integers, all others rejected" wire contract honest for a future
/// transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sets the session's send timeout, in milliseconds. Zero means
    /// immediate (non-deferred) writes.
    SetSendTimeout(u64),
    /// Sets the session's receive timeout, in milliseconds. Zero means
    /// non-blocking reads.
    SetRecvTimeout(u64),
    /// Cancels every pending deferred write still in the `Scheduled` state.
    RevokeDelayedMessages,
}

struct PendingWriteRecord {
    id: u64,
    task: DelayedTask,
}

struct SessionState {
    send_timeout: Duration,
    recv_timeout: Duration,
    pending_writes: Vec<PendingWriteRecord>,
}

struct Inflight {
    count: Mutex<usize>,
    cond: std::sync::Condvar,
}

pub(crate) struct Session {
    handle: SessionHandle,
    instance_idx: usize,
    state: Mutex<SessionState>,
    next_write_id: AtomicU64,
    inflight: Inflight,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle, instance_idx: usize) -> Self {
        Self {
            handle,
            instance_idx,
            state: Mutex::new(SessionState {
                send_timeout: Duration::ZERO,
                recv_timeout: Duration::ZERO,
                pending_writes: Vec::new(),
            }),
            next_write_id: AtomicU64::new(0),
            inflight: Inflight {
                count: Mutex::new(0),
                cond: std::sync::Condvar::new(),
            },
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub(crate) fn instance_idx(&self) -> usize {
        self.instance_idx
    }

    pub(crate) fn send_timeout(&self) -> Duration {
        lock_poisoned(self.state.lock()).send_timeout
    }

    pub(crate) fn recv_timeout(&self) -> Duration {
        lock_poisoned(self.state.lock()).recv_timeout
    }

    pub(crate) fn set_send_timeout(&self, ms: u64) {
        lock_poisoned(self.state.lock()).send_timeout = Duration::from_millis(ms);
    }

    pub(crate) fn set_recv_timeout(&self, ms: u64) {
        lock_poisoned(self.state.lock()).recv_timeout = Duration::from_millis(ms);
    }

    /// Allocates a fresh id for a new pending write. Not yet registered.
    pub(crate) fn next_write_id(&self) -> u64 {
        self.next_write_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register_pending_write(
        &self,
        id: u64,
        task: DelayedTask,
    ) -> Result<(), BrokerError> {
        let mut guard = lock_poisoned(self.state.lock());
        guard
            .pending_writes
            .try_reserve(1)
            .map_err(|_| BrokerError::NoMem)?;
        guard.pending_writes.push(PendingWriteRecord { id, task });
        Ok(())
    }

    /// Removes a pending write by id, if still present. Called by a fired
    /// deferred task to self-remove; a no-op if `control(REVOKE)` or
    /// `flush` already won the race and removed it first.
    pub(crate) fn remove_pending_write(&self, id: u64) {
        lock_poisoned(self.state.lock())
            .pending_writes
            .retain(|rec| rec.id != id);
    }

    /// Cancels every pending write still `Scheduled`. Returns the number
    /// cancelled (for logging). Pending writes that are already firing are
    /// left alone — their task self-removes when it completes.
    pub(crate) fn revoke_pending_writes(&self) -> usize {
        let mut guard = lock_poisoned(self.state.lock());
        let before = guard.pending_writes.len();
        guard.pending_writes.retain(|rec| !rec.task.cancel());
        before - guard.pending_writes.len()
    }

    pub(crate) fn inflight_begin(&self) {
        *lock_poisoned(self.inflight.count.lock()) += 1;
    }

    pub(crate) fn inflight_end(&self) {
        let mut guard = lock_poisoned(self.inflight.count.lock());
        *guard -= 1;
        if *guard == 0 {
            self.inflight.cond.notify_all();
        }
    }

    /// Blocks until every deferred write that is currently *firing* (not
    /// merely scheduled) on this session has completed. Writes still
    /// `Scheduled` are left untouched and will fire normally after close —
    /// a deliberate contract, not an oversight.
    pub(crate) fn await_quiescence(&self) {
        let mut guard = lock_poisoned(self.inflight.count.lock());
        while *guard > 0 {
            guard = lock_poisoned(self.inflight.cond.wait(guard));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_default_to_zero() {
        let s = Session::new(SessionHandle(1), 0);
        assert_eq!(s.send_timeout(), Duration::ZERO);
        assert_eq!(s.recv_timeout(), Duration::ZERO);
    }

    #[test]
    fn set_timeouts_round_trip() {
        let s = Session::new(SessionHandle(1), 0);
        s.set_send_timeout(50);
        s.set_recv_timeout(100);
        assert_eq!(s.send_timeout(), Duration::from_millis(50));
        assert_eq!(s.recv_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn revoke_counts_only_cancellable_writes() {
        let s = Session::new(SessionHandle(1), 0);
        let id = s.next_write_id();
        let task = DelayedTask::schedule(Duration::from_secs(5), || {});
        s.register_pending_write(id, task).unwrap();
        assert_eq!(s.revoke_pending_writes(), 1);
        assert_eq!(s.revoke_pending_writes(), 0);
    }
}
