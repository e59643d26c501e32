//! Cache configuration.
//!
//! Controls the resolver and invalidation coordinator via `transit-pulse.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_KV_TIMEOUT_MS: u64 = 100;
const DEFAULT_EXECUTOR_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Runtime knobs shared by the resolver and the invalidation coordinator.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve from and populate the KV store. When false every read goes to
    /// the query executor and invalidation is skipped.
    pub enabled: bool,
    /// Upper bound for each KV round-trip.
    pub kv_timeout: Duration,
    /// Upper bound for each query executor call.
    pub executor_timeout: Duration,
    /// Entry limit of the in-process store used when no Redis URL is set.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kv_timeout: Duration::from_millis(DEFAULT_KV_TIMEOUT_MS),
            executor_timeout: Duration::from_millis(DEFAULT_EXECUTOR_TIMEOUT_MS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            kv_timeout: settings.kv_timeout,
            executor_timeout: settings.executor_timeout,
            memory_capacity: settings.memory_capacity.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.kv_timeout, Duration::from_millis(100));
        assert_eq!(config.executor_timeout, Duration::from_secs(2));
        assert_eq!(config.memory_capacity, 10_000);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }
}
