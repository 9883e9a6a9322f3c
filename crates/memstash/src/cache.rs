// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use bytes::Bytes;
use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, RemoteStore, StoreConnector};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Connection, Error, ErrorKind, LifecycleState, Result};

/// Typed access to a distributed key-value cache.
///
/// Values are encoded as JSON before they reach the store. Every call is a round trip;
/// nothing is cached locally.
pub trait Cache: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `None` when the key is absent or its TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotOpened`] when the cache is not open,
    /// [`ErrorKind::Serialization`] when the stored bytes do not decode as `T` and
    /// [`ErrorKind::Store`] when the store read fails.
    fn retrieve<T>(&self, trace_id: &str, key: &str) -> impl Future<Output = Result<Option<T>>> + Send
    where
        T: DeserializeOwned + Send;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// A zero `ttl` uses the configured default TTL. Returns the value when it was
    /// stored and `None` when the store declined or failed to keep it.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotOpened`] when the cache is not open and
    /// [`ErrorKind::Serialization`] when `value` cannot be encoded.
    fn store<T>(&self, trace_id: &str, key: &str, value: T, ttl: Duration) -> impl Future<Output = Result<Option<T>>> + Send
    where
        T: Serialize + Send + Sync;

    /// Deletes the value stored under `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotOpened`] when the cache is not open and
    /// [`ErrorKind::Store`] when the store delete fails.
    fn remove(&self, trace_id: &str, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A [`Cache`] backed by a [`RemoteStore`] built by the connector `C`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memstash::{Cache, RemoteCache};
/// use memstash_store::ConfigParams;
/// use memstash_store::testing::{FakeConnector, FakeStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut cache = RemoteCache::new(FakeConnector::new(FakeStore::new(Clock::new_frozen())));
/// cache.configure(&ConfigParams::from_tuples([("connection.host", "localhost")]));
/// cache.open("trace-1").await?;
///
/// cache.store("trace-1", "greeting", "hello".to_owned(), Duration::ZERO).await?;
/// let value: Option<String> = cache.retrieve("trace-1", "greeting").await?;
/// assert_eq!(value.as_deref(), Some("hello"));
///
/// cache.close("trace-1");
/// # Ok::<(), memstash::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct RemoteCache<C: StoreConnector, R = ConfigConnectionResolver> {
    connection: Connection<C, R>,
}

impl<C: StoreConnector> RemoteCache<C> {
    /// Creates a closed cache that resolves endpoints from its configuration.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connection: Connection::new(connector),
        }
    }
}

impl<C, R> RemoteCache<C, R>
where
    C: StoreConnector,
    R: ConnectionResolver,
{
    /// Creates a closed cache that resolves endpoints through `resolver`.
    #[must_use]
    pub fn with_resolver(connector: C, resolver: R) -> Self {
        Self {
            connection: Connection::with_resolver(connector, resolver),
        }
    }

    /// See [`Connection::configure`].
    pub fn configure(&mut self, config: &ConfigParams) {
        self.connection.configure(config);
    }

    /// See [`Connection::open`].
    ///
    /// # Errors
    ///
    /// Fails as [`Connection::open`] does.
    pub async fn open(&self, trace_id: &str) -> Result<()> {
        self.connection.open(trace_id).await
    }

    /// See [`Connection::close`].
    pub fn close(&self, trace_id: &str) {
        self.connection.close(trace_id);
    }

    /// See [`Connection::is_open`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// See [`Connection::state`].
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.connection.state()
    }
}

impl<C, R> Cache for RemoteCache<C, R>
where
    C: StoreConnector,
    R: ConnectionResolver,
{
    async fn retrieve<T>(&self, trace_id: &str, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let handle = self.connection.handle(trace_id)?;
        let Some(bytes) = handle.store.get(key).await.map_err(|e| Error::store(trace_id, e))? else {
            tracing::debug!(trace_id, key, "cache miss");
            return Ok(None);
        };

        tracing::debug!(trace_id, key, "cache hit");
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::caused_by(ErrorKind::Serialization, trace_id, e))
    }

    async fn store<T>(&self, trace_id: &str, key: &str, value: T, ttl: Duration) -> Result<Option<T>>
    where
        T: Serialize + Send + Sync,
    {
        let handle = self.connection.handle(trace_id)?;
        let bytes = serde_json::to_vec(&value).map_err(|e| Error::caused_by(ErrorKind::Serialization, trace_id, e))?;
        let ttl = if ttl.is_zero() { handle.options.default_ttl() } else { ttl };
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        match handle.store.set(key, Bytes::from(bytes), ttl).await {
            Ok(true) => {
                tracing::debug!(trace_id, key, ttl_ms, "cache value stored");
                Ok(Some(value))
            }
            Ok(false) => {
                tracing::debug!(trace_id, key, ttl_ms, "cache value not stored");
                Ok(None)
            }
            Err(error) => {
                tracing::warn!(trace_id, key, ttl_ms, %error, "cache store failed");
                Ok(None)
            }
        }
    }

    async fn remove(&self, trace_id: &str, key: &str) -> Result<()> {
        let handle = self.connection.handle(trace_id)?;
        handle.store.delete(key).await.map_err(|e| Error::store(trace_id, e))?;
        tracing::debug!(trace_id, key, "cache value removed");
        Ok(())
    }
}
