//! Error taxonomy for the broker.

use thiserror::Error;

use crate::session::SessionHandle;

/// Errors raised by [`crate::Broker`] operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// `write`: `len > max_message_size`.
    #[error("message of {len} bytes exceeds max_message_size of {max} bytes")]
    MsgTooLarge { len: usize, max: usize },

    /// `write` (immediate path): instance is at its storage cap.
    #[error("instance has no free space for a message of {len} bytes")]
    NoSpace { len: usize },

    /// `read`: empty queue, non-blocking session.
    #[error("no message available on a non-blocking session")]
    NoMsg,

    /// `read`: the blocking read's bound elapsed without delivery.
    #[error("blocking read timed out")]
    TimedOut,

    /// `read`: a `flush` fired while the read was parked.
    #[error("blocking read was cancelled by a flush")]
    Cancelled,

    /// `read`: the read was interrupted (see [`crate::Interrupt`]).
    #[error("blocking read was interrupted")]
    Interrupted,

    /// Allocation failed.
    #[error("allocation failed")]
    NoMem,

    /// Caller supplied an invalid buffer (only reachable through the raw
    /// pointer entry points, see [`crate::Broker::write_from_raw_parts`]).
    #[error("invalid buffer")]
    BadAddr,

    /// `control_raw`: unknown command code.
    #[error("unknown control command code {0}")]
    BadCmd(u32),

    /// A session handle that is not (or no longer) open.
    #[error("session handle {0:?} is not open")]
    InvalidHandle(SessionHandle),

    /// An instance index outside `[0, N)`.
    #[error("instance index {0} is out of range")]
    InvalidInstance(usize),

    /// Broker configuration rejected at construction time.
    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by [`crate::Config::new`].
#[derive(Debug, Clone, Copy, Error)]
pub enum ConfigError {
    #[error("num_instances must be at least 1")]
    NoInstances,

    #[error("max_message_size must be greater than 0")]
    ZeroMessageSize,

    #[error(
        "max_storage_size ({storage}) must be >= max_message_size ({message})"
    )]
    StorageSmallerThanMessage { storage: usize, message: usize },
}
