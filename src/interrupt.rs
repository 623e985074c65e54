//! Opt-in substitute for OS signal delivery.
//!
//! `Interrupted` models a signal delivered to a thread blocked waiting for a
//! message. A library embedded in an arbitrary host process has no portable
//! "this thread just received SIGINT" hook to piggyback on, so [`Interrupt`]
//! is an explicit, cloneable handle a caller may pass to
//! [`crate::Broker::read_interruptible`]; firing it from any thread makes
//! that blocked read return [`crate::BrokerError::Interrupted`], exactly as
//! a delivered signal would, provided neither `msg_available` nor
//! `flushing` has already been set.
//!
//! Plain [`crate::Broker::read`] never observes an `Interrupt` and can never
//! return `Interrupted`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable, fireable interrupt token for [`crate::Broker::read_interruptible`].
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    fired: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a fresh, unfired interrupt token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the interrupt. Safe to call from any thread, any number of times.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    /// Clears the interrupt so the token can be reused for a subsequent call.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
