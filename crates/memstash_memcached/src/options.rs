// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tuning options for the memcached client.

use std::time::Duration;

use memstash_store::ConfigParams;

/// The longest relative expiration memcached accepts. Larger values are read as
/// absolute unix timestamps by the server.
pub const MAX_RELATIVE_EXPIRATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Options of a [`MemcachedClient`](crate::MemcachedClient).
///
/// Read from the `options.*` keys of the adapter configuration with
/// [`from_config`](Self::from_config), or built in code:
///
/// ```
/// use std::time::Duration;
///
/// use memstash_memcached::MemcachedOptions;
///
/// let options = MemcachedOptions::new()
///     .pool_size(2)
///     .retries(0)
///     .operation_timeout(Some(Duration::from_millis(250)));
/// ```
///
/// | key | setter | default |
/// |---|---|---|
/// | `options.pool_size` | [`pool_size`](Self::pool_size) | 5 |
/// | `options.max_key_size` | [`max_key_size`](Self::max_key_size) | 250 bytes |
/// | `options.max_expiration` | [`max_expiration`](Self::max_expiration) | 2 592 000 s |
/// | `options.max_value` | [`max_value`](Self::max_value) | 1 048 576 bytes |
/// | `options.retries` | [`retries`](Self::retries) | 2 |
/// | `options.reconnect` | [`reconnect`](Self::reconnect) | 100 ms |
/// | `options.failures` | [`failures`](Self::failures) | 5 |
/// | `options.retry` | [`retry`](Self::retry) | 30 000 ms |
/// | `options.idle` | [`idle`](Self::idle) | 300 000 ms |
/// | `options.operation_timeout` | [`operation_timeout`](Self::operation_timeout) | none |
///
/// `options.max_size` is accepted for compatibility and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedOptions {
    pub(crate) pool_size: usize,
    pub(crate) max_key_size: usize,
    pub(crate) max_expiration: Duration,
    pub(crate) max_value: usize,
    pub(crate) retries: u32,
    pub(crate) reconnect: Duration,
    pub(crate) failures: u32,
    pub(crate) retry: Duration,
    pub(crate) idle: Duration,
    pub(crate) operation_timeout: Option<Duration>,
}

impl Default for MemcachedOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MemcachedOptions {
    /// Creates options with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool_size: 5,
            max_key_size: 250,
            max_expiration: MAX_RELATIVE_EXPIRATION,
            max_value: 1_048_576,
            retries: 2,
            reconnect: Duration::from_millis(100),
            failures: 5,
            retry: Duration::from_secs(30),
            idle: Duration::from_secs(300),
            operation_timeout: None,
        }
    }

    /// Reads the options from the `options.*` keys of `config`.
    ///
    /// Missing or unparseable values keep their defaults.
    #[must_use]
    pub fn from_config(config: &ConfigParams) -> Self {
        let d = Self::new();
        let options = config.section("options");

        let operation_timeout = match options.get_as_u64_or("operation_timeout", 0) {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        };

        Self {
            pool_size: to_usize(options.get_as_u64_or("pool_size", d.pool_size as u64)).max(1),
            max_key_size: to_usize(options.get_as_u64_or("max_key_size", d.max_key_size as u64)),
            max_expiration: Duration::from_secs(options.get_as_u64_or("max_expiration", d.max_expiration.as_secs()))
                .min(MAX_RELATIVE_EXPIRATION),
            max_value: to_usize(options.get_as_u64_or("max_value", d.max_value as u64)),
            retries: to_u32(options.get_as_u64_or("retries", u64::from(d.retries))),
            reconnect: options.get_as_duration_millis_or("reconnect", d.reconnect),
            failures: to_u32(options.get_as_u64_or("failures", u64::from(d.failures))),
            retry: options.get_as_duration_millis_or("retry", d.retry),
            idle: options.get_as_duration_millis_or("idle", d.idle),
            operation_timeout,
        }
    }

    /// Sets the number of connections kept per server. At least one is always kept.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Sets the longest key, in bytes, that is sent to the server.
    #[must_use]
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the longest expiration sent to the server, capped at thirty days.
    #[must_use]
    pub fn max_expiration(mut self, max: Duration) -> Self {
        self.max_expiration = max.min(MAX_RELATIVE_EXPIRATION);
        self
    }

    /// Sets the largest value, in bytes, that is sent to the server.
    #[must_use]
    pub fn max_value(mut self, size: usize) -> Self {
        self.max_value = size;
        self
    }

    /// Sets how many times an operation reconnects after a connection failure.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the pause before each reconnect attempt.
    #[must_use]
    pub fn reconnect(mut self, delay: Duration) -> Self {
        self.reconnect = delay;
        self
    }

    /// Sets how many consecutive failures mark a server as dead.
    #[must_use]
    pub fn failures(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    /// Sets how long a dead server is skipped before it is tried again.
    #[must_use]
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how long a pooled connection may sit unused before it is re-established.
    #[must_use]
    pub fn idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Sets the deadline of a single server call. `None` waits indefinitely.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Converts a TTL into the whole seconds memcached expects.
    ///
    /// Partial seconds round up so an item never expires early. Zero stays zero, meaning
    /// no expiry, and everything else is clamped to the configured maximum.
    pub(crate) fn expiration_secs(&self, ttl: Duration) -> i64 {
        if ttl.is_zero() {
            return 0;
        }

        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let secs = secs.min(self.max_expiration.as_secs()).max(1);
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
