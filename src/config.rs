//! Process-wide broker parameters, fixed at construction time.

use crate::error::ConfigError;

/// Defaults match a modest single-machine deployment: a handful of
/// instances, kilobyte-sized messages, a storage cap well above one message.
const DEFAULT_NUM_INSTANCES: usize = 3;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;
const DEFAULT_MAX_STORAGE_SIZE: usize = 65536;

/// Immutable configuration for a [`crate::Broker`].
///
/// Reconfiguration after construction is not supported: these parameters
/// are only ever read at init, and a `Broker` has no path to mutate them
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    num_instances: usize,
    max_message_size: usize,
    max_storage_size: usize,
}

impl Config {
    /// Validates and builds a configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if `num_instances` is zero, `max_message_size`
    /// is zero, or `max_storage_size` is smaller than `max_message_size`.
    pub fn new(
        num_instances: usize,
        max_message_size: usize,
        max_storage_size: usize,
    ) -> Result<Self, ConfigError> {
        if num_instances == 0 {
            return Err(ConfigError::NoInstances);
        }
        if max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        if max_storage_size < max_message_size {
            return Err(ConfigError::StorageSmallerThanMessage {
                storage: max_storage_size,
                message: max_message_size,
            });
        }
        Ok(Self {
            num_instances,
            max_message_size,
            max_storage_size,
        })
    }

    #[must_use]
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    #[must_use]
    pub fn max_storage_size(&self) -> usize {
        self.max_storage_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_instances: DEFAULT_NUM_INSTANCES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.num_instances(), 3);
        assert_eq!(cfg.max_message_size(), 4096);
        assert_eq!(cfg.max_storage_size(), 65536);
    }

    #[test]
    fn rejects_zero_instances() {
        assert!(matches!(
            Config::new(0, 4096, 65536),
            Err(ConfigError::NoInstances)
        ));
    }

    #[test]
    fn rejects_zero_message_size() {
        assert!(matches!(
            Config::new(1, 0, 65536),
            Err(ConfigError::ZeroMessageSize)
        ));
    }

    #[test]
    fn rejects_storage_smaller_than_message() {
        assert!(matches!(
            Config::new(1, 4096, 100),
            Err(ConfigError::StorageSmallerThanMessage { .. })
        ));
    }
}
