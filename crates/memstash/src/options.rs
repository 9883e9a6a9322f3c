// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use memstash_store::ConfigParams;

/// Default TTL applied by [`Cache::store`](crate::Cache::store) when called with a zero TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default pause between two attempts of [`Lock::acquire_lock`](crate::Lock::acquire_lock).
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Adapter-level options, read once from the configuration when the adapter opens.
///
/// | key | field | default |
/// |---|---|---|
/// | `options.timeout` | [`default_ttl`](Self::default_ttl) | 60 000 ms |
/// | `options.retry_timeout` | [`retry_interval`](Self::retry_interval) | 100 ms |
///
/// Every other `options.*` key is left to the store client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    default_ttl: Duration,
    retry_interval: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_CACHE_TTL,
            retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

impl AdapterOptions {
    /// Reads the options from `config`, using defaults for missing or invalid values.
    #[must_use]
    pub fn from_config(config: &ConfigParams) -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: config.get_as_duration_millis_or("options.timeout", defaults.default_ttl),
            retry_interval: config.get_as_duration_millis_or("options.retry_timeout", defaults.retry_interval),
        }
    }

    /// The TTL used for cache entries stored with a zero TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The pause between lock acquisition attempts.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}
