//! The six-operation broker API: `open`, `close`, `read`, `write`,
//! `control`, `flush`, dispatched by `(instance_idx, session_handle)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use defer_heavy::defer;

use crate::config::Config;
use crate::delayed_task::DelayedTask;
use crate::error::BrokerError;
use crate::instance::Instance;
use crate::interrupt::Interrupt;
use crate::lock_policy::lock_poisoned;
use crate::message::Message;
use crate::session::{Command, Session, SessionHandle};

/// The concurrent broker engine. Every operation may be called concurrently
/// from different threads; there is no per-handle serialisation beyond what
/// each operation documents.
pub struct Broker {
    config: Config,
    instances: Vec<Arc<Instance>>,
    sessions: Mutex<HashMap<SessionHandle, Arc<Session>>>,
    next_handle: AtomicU64,
}

impl Broker {
    /// Builds a broker with `config.num_instances()` fresh, empty instances.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let instances = (0..config.num_instances())
            .map(|idx| Arc::new(Instance::new(idx, config.max_storage_size())))
            .collect();
        Self {
            config,
            instances,
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn check_instance(&self, instance_idx: usize) -> Result<(), BrokerError> {
        if instance_idx >= self.instances.len() {
            return Err(BrokerError::InvalidInstance(instance_idx));
        }
        Ok(())
    }

    fn resolve(&self, handle: SessionHandle) -> Result<(Arc<Session>, Arc<Instance>), BrokerError> {
        let sessions = lock_poisoned(self.sessions.lock());
        let session = sessions
            .get(&handle)
            .cloned()
            .ok_or(BrokerError::InvalidHandle(handle))?;
        let instance = Arc::clone(&self.instances[session.instance_idx()]);
        Ok((session, instance))
    }

    /// Allocates a session bound to `instance_idx`, both timeouts
    /// start at zero.
    ///
    /// # Errors
    /// [`BrokerError::InvalidInstance`] if `instance_idx` is out of range,
    /// [`BrokerError::NoMem`] if allocation for the new session record fails.
    pub fn open(&self, instance_idx: usize) -> Result<SessionHandle, BrokerError> {
        self.check_instance(instance_idx)?;
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(Session::new(handle, instance_idx));

        self.instances[instance_idx].attach_session(handle)?;

        let mut sessions = lock_poisoned(self.sessions.lock());
        if sessions.try_reserve(1).is_err() {
            drop(sessions);
            self.instances[instance_idx].detach_session(handle);
            return Err(BrokerError::NoMem);
        }
        sessions.insert(handle, session);
        drop(sessions);

        tracing::debug!(instance = instance_idx, handle = handle.0, "session opened");
        Ok(handle)
    }

    /// Awaits quiescence of writes already firing, detaches the
    /// session, and frees it. Deliberately does not cancel writes that are
    /// still merely `Scheduled`; they continue to fire after this returns.
    /// Never fails; closing an already-closed or unknown handle is a no-op.
    pub fn close(&self, handle: SessionHandle) {
        let session = lock_poisoned(self.sessions.lock()).remove(&handle);
        let Some(session) = session else {
            return;
        };
        session.await_quiescence();
        self.instances[session.instance_idx()].detach_session(handle);
        tracing::debug!(handle = handle.0, "session closed");
    }

    /// Immediate or deferred post depending on the session's send
    /// timeout. `Ok(0)` means the write was deferred, not rejected.
    ///
    /// # Errors
    /// [`BrokerError::InvalidHandle`], [`BrokerError::MsgTooLarge`],
    /// [`BrokerError::NoMem`], [`BrokerError::NoSpace`] (immediate path only).
    pub fn write(&self, handle: SessionHandle, data: &[u8]) -> Result<usize, BrokerError> {
        let (session, instance) = self.resolve(handle)?;

        if data.len() > self.config.max_message_size() {
            return Err(BrokerError::MsgTooLarge {
                len: data.len(),
                max: self.config.max_message_size(),
            });
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())
            .map_err(|_| BrokerError::NoMem)?;
        buf.extend_from_slice(data);

        let send_timeout = session.send_timeout();
        if send_timeout.is_zero() {
            let len = buf.len();
            instance.post_message(Message::new(buf))?;
            return Ok(len);
        }

        let id = session.next_write_id();
        let deferred_session = Arc::clone(&session);
        let deferred_instance = Arc::clone(&instance);
        let task = DelayedTask::schedule(send_timeout, move || {
            deferred_session.remove_pending_write(id);
            deferred_session.inflight_begin();
            defer! {
                // Also runs on panic, so a bad post never leaves
                // await_quiescence() waiting on a count that can't drop.
                deferred_session.inflight_end();
            }
            if let Err(err) = deferred_instance.post_message(Message::new(buf)) {
                tracing::warn!(error = %err, "deferred write dropped");
            }
        });
        session.register_pending_write(id, task)?;
        Ok(0)
    }

    /// Destructive, bounded blocking read. Never returns
    /// [`BrokerError::Interrupted`] because no [`Interrupt`] is wired in.
    /// Use [`Broker::read_interruptible`] for that.
    ///
    /// # Errors
    /// [`BrokerError::InvalidHandle`], [`BrokerError::NoMsg`],
    /// [`BrokerError::TimedOut`], [`BrokerError::Cancelled`].
    pub fn read(&self, handle: SessionHandle, cap: usize) -> Result<Vec<u8>, BrokerError> {
        let (session, instance) = self.resolve(handle)?;
        instance.read(&session, cap, None)
    }

    /// As [`Broker::read`], but `interrupt.fire()` (from any thread) will
    /// additionally unblock this call with [`BrokerError::Interrupted`] if
    /// neither a message nor a flush has already claimed it.
    ///
    /// # Errors
    /// As [`Broker::read`], plus [`BrokerError::Interrupted`].
    pub fn read_interruptible(
        &self,
        handle: SessionHandle,
        cap: usize,
        interrupt: &Interrupt,
    ) -> Result<Vec<u8>, BrokerError> {
        let (session, instance) = self.resolve(handle)?;
        instance.read(&session, cap, Some(interrupt))
    }

    /// Typed control surface. Error-free by construction: `Command`
    /// is a closed enum so [`BrokerError::BadCmd`] can never be produced
    /// here. See [`Broker::control_raw`] for the opaque-integer surface.
    ///
    /// # Errors
    /// [`BrokerError::InvalidHandle`].
    pub fn control(&self, handle: SessionHandle, cmd: Command) -> Result<(), BrokerError> {
        let (session, _instance) = self.resolve(handle)?;
        match cmd {
            Command::SetSendTimeout(ms) => session.set_send_timeout(ms),
            Command::SetRecvTimeout(ms) => session.set_recv_timeout(ms),
            Command::RevokeDelayedMessages => {
                let revoked = session.revoke_pending_writes();
                tracing::debug!(handle = handle.0, revoked, "revoked delayed messages");
            }
        }
        Ok(())
    }

    /// Opaque-integer control surface: three distinct command codes, all
    /// others rejected. `0` = `SET_SEND_TIMEOUT`, `1` = `SET_RECV_TIMEOUT`,
    /// `2` = `REVOKE_DELAYED_MESSAGES`.
    ///
    /// # Errors
    /// [`BrokerError::InvalidHandle`], [`BrokerError::BadCmd`].
    pub fn control_raw(&self, handle: SessionHandle, code: u32, arg: u64) -> Result<(), BrokerError> {
        let cmd = match code {
            0 => Command::SetSendTimeout(arg),
            1 => Command::SetRecvTimeout(arg),
            2 => Command::RevokeDelayedMessages,
            other => return Err(BrokerError::BadCmd(other)),
        };
        self.control(handle, cmd)
    }

    /// Cancels every pending write on every session attached to
    /// `instance_idx`, then wakes every blocked reader with `Cancelled`.
    /// Never fails; idempotent.
    ///
    /// # Errors
    /// [`BrokerError::InvalidInstance`].
    pub fn flush(&self, instance_idx: usize) -> Result<(), BrokerError> {
        self.check_instance(instance_idx)?;
        let instance = Arc::clone(&self.instances[instance_idx]);

        let handles = instance.session_handles();
        let mut total_revoked = 0;
        {
            let sessions = lock_poisoned(self.sessions.lock());
            for h in handles {
                if let Some(session) = sessions.get(&h) {
                    total_revoked += session.revoke_pending_writes();
                }
            }
        }
        instance.flush_readers();
        tracing::debug!(instance = instance_idx, revoked = total_revoked, "flush complete");
        Ok(())
    }

    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for the duration of this call.
    pub unsafe fn write_from_raw_parts(
        &self,
        handle: SessionHandle,
        ptr: *const u8,
        len: usize,
    ) -> Result<usize, BrokerError> {
        if ptr.is_null() {
            return Err(BrokerError::BadAddr);
        }
        let slice = std::slice::from_raw_parts(ptr, len);
        self.write(handle, slice)
    }

    /// # Safety
    /// `ptr` must be valid for writes of `cap` bytes for the duration of this call.
    pub unsafe fn read_into_raw_parts(
        &self,
        handle: SessionHandle,
        ptr: *mut u8,
        cap: usize,
    ) -> Result<usize, BrokerError> {
        if ptr.is_null() {
            return Err(BrokerError::BadAddr);
        }
        let data = self.read(handle, cap)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        Ok(data.len())
    }
}
