// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use memstash_store::{ConfigParams, Endpoint, Error, StoreConnector};
use tick::Clock;

use crate::{MemcachedClient, MemcachedOptions};

/// Builds [`MemcachedClient`]s for the `memstash` adapters.
///
/// Client options are read from the `options.*` keys of the adapter configuration,
/// see [`MemcachedOptions`].
#[derive(Debug, Clone, Default)]
pub struct MemcachedConnector {
    clock: Option<Clock>,
}

impl MemcachedConnector {
    /// Creates a connector whose clients run on a Tokio-driven clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose clients measure idle time, reconnect pauses and
    /// timeouts on `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock: Some(clock) }
    }
}

impl StoreConnector for MemcachedConnector {
    type Store = MemcachedClient;

    /// # Panics
    ///
    /// Panics when no clock was given and this is not called from within a Tokio runtime.
    async fn connect(&self, trace_id: &str, endpoints: &[Endpoint], config: &ConfigParams) -> Result<MemcachedClient, Error> {
        let options = MemcachedOptions::from_config(config);
        let clock = self.clock.clone().unwrap_or_else(Clock::new_tokio);
        let client = MemcachedClient::new(endpoints, options, clock)?;

        tracing::info!(
            trace_id,
            endpoints = ?client.servers().collect::<Vec<_>>(),
            pool_size = client.options().pool_size,
            "memcached client configured"
        );

        Ok(client)
    }
}
