// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolution of configuration into server endpoints.

use crate::{ConfigParams, Endpoint, Error};

/// Produces the ordered list of candidate server endpoints for an adapter.
pub trait ConnectionResolver: Send + Sync {
    /// Captures the configuration that subsequent [`resolve_all`](Self::resolve_all) calls read.
    fn configure(&mut self, config: &ConfigParams);

    /// Resolves every configured endpoint. An empty list is a valid result.
    fn resolve_all(&self, trace_id: &str) -> impl Future<Output = Result<Vec<Endpoint>, Error>> + Send;
}

/// Looks up endpoints registered under a discovery key.
pub trait Discovery: Send + Sync {
    /// Returns the endpoints registered under `key`.
    fn resolve_all(&self, trace_id: &str, key: &str) -> impl Future<Output = Result<Vec<Endpoint>, Error>> + Send;
}

/// A [`Discovery`] that knows no keys.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct NoDiscovery;

impl Discovery for NoDiscovery {
    async fn resolve_all(&self, _trace_id: &str, _key: &str) -> Result<Vec<Endpoint>, Error> {
        Ok(Vec::new())
    }
}

/// Resolves endpoints from `connection.*` and `connections.<name>.*` configuration sections.
///
/// Within a section, `uri` wins over `host`/`port`. A section with a `discovery_key` is
/// resolved through the [`Discovery`] passed to [`with_discovery`](Self::with_discovery);
/// without one the section is skipped.
///
/// # Examples
///
/// ```
/// use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, Endpoint};
/// # futures::executor::block_on(async {
///
/// let mut resolver = ConfigConnectionResolver::new();
/// resolver.configure(&ConfigParams::from_tuples([
///     ("connections.primary.uri", "memcached://cache-1:11211"),
///     ("connections.secondary.host", "cache-2"),
/// ]));
///
/// let endpoints = resolver.resolve_all("trace-1").await?;
/// assert_eq!(
///     endpoints,
///     vec![
///         Endpoint::uri("memcached://cache-1:11211"),
///         Endpoint::host_port("cache-2", 11211),
///     ]
/// );
/// # Ok::<(), memstash_store::Error>(())
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigConnectionResolver<D = NoDiscovery> {
    sections: Vec<ConfigParams>,
    discovery: Option<D>,
}

impl ConfigConnectionResolver {
    /// Creates a resolver with no configuration and no discovery.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            discovery: None,
        }
    }
}

impl<D> ConfigConnectionResolver<D> {
    /// Routes `discovery_key` sections through `discovery`.
    #[must_use]
    pub fn with_discovery<N: Discovery>(self, discovery: N) -> ConfigConnectionResolver<N> {
        ConfigConnectionResolver {
            sections: self.sections,
            discovery: Some(discovery),
        }
    }
}

impl<D: Discovery> ConnectionResolver for ConfigConnectionResolver<D> {
    fn configure(&mut self, config: &ConfigParams) {
        let single = config.section("connection");
        let named = config
            .section_names("connections")
            .into_iter()
            .map(|name| config.section(&format!("connections.{name}")));

        self.sections = std::iter::once(single).chain(named).filter(|s| !s.is_empty()).collect();
    }

    async fn resolve_all(&self, trace_id: &str) -> Result<Vec<Endpoint>, Error> {
        let mut endpoints = Vec::with_capacity(self.sections.len());

        for section in &self.sections {
            if let Some(key) = section.get_non_empty("discovery_key") {
                match &self.discovery {
                    Some(discovery) => endpoints.extend(discovery.resolve_all(trace_id, key).await?),
                    None => tracing::warn!(trace_id, discovery_key = key, "no discovery registered, skipping connection"),
                }
                continue;
            }

            if let Some(uri) = section.get_non_empty("uri") {
                endpoints.push(Endpoint::uri(uri));
                continue;
            }

            let host = section.get_non_empty("host");
            let port = section.get_as_u16("port");
            if host.is_some() || port.is_some() {
                endpoints.push(Endpoint::from_parts(host, port));
            }
        }

        Ok(endpoints)
    }
}
