//! Poisoned-mutex recovery policy shared by every lock in this crate.
//!
//! Recovers instead of propagating: broker-internal locks guard plain owned
//! data, never references into freed memory, so a panicking reader cannot
//! leave a sibling session holding a dangling value. Surfacing "the mutex
//! was poisoned" to a caller would also have nowhere to go in
//! `BrokerError`'s taxonomy.

use std::sync::LockResult;

pub(crate) fn lock_poisoned<T>(result: LockResult<T>) -> T {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("recovered a poisoned lock");
            poisoned.into_inner()
        }
    }
}
