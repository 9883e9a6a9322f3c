// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Distributed cache and lease-based lock adapters over a remote key-value store.
//!
//! This crate provides:
//! - [`RemoteCache`], a typed [`Cache`] storing JSON-encoded values with per-entry TTLs
//! - [`RemoteLock`], a [`Lock`] built on add-if-absent marker items that expire on their own
//! - [`Connection`], the open/closed lifecycle both adapters share
//!
//! Both adapters are configured from flat [`ConfigParams`], opened once with
//! [`open`](RemoteCache::open) and then shared between tasks. Every operation takes a
//! `trace_id` that is attached to errors and log events.
//!
//! # Examples
//!
//! ## Memcached
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use memstash::{Cache, ConfigParams, Lock, MemcachedCache, MemcachedConnector, MemcachedLock};
//! use tick::Clock;
//!
//! # async fn run() -> Result<(), memstash::Error> {
//! let config = ConfigParams::from_tuples([
//!     ("connections.a.uri", "tcp://cache-a:11211"),
//!     ("connections.b.host", "cache-b"),
//!     ("options.timeout", "30000"),
//! ]);
//!
//! let mut cache = MemcachedCache::new(MemcachedConnector::new());
//! cache.configure(&config);
//! cache.open("trace-1").await?;
//! cache.store("trace-1", "user:42", "ada".to_owned(), Duration::ZERO).await?;
//!
//! let mut lock = MemcachedLock::new(MemcachedConnector::new(), Clock::new_tokio());
//! lock.configure(&config);
//! lock.open("trace-1").await?;
//! lock.acquire_lock("trace-1", "job:nightly", Duration::from_secs(60), Duration::from_secs(5)).await?;
//! lock.release_lock("trace-1", "job:nightly").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! With the `test-util` feature the in-memory [`FakeStore`](memstash_store::testing::FakeStore)
//! stands in for a real server and expires items on a `tick` clock:
//!
//! ```
//! use std::time::Duration;
//!
//! use memstash::{Cache, ConfigParams, RemoteCache};
//! use memstash_store::testing::{FakeConnector, FakeStore};
//! use tick::ClockControl;
//! # futures::executor::block_on(async {
//!
//! let control = ClockControl::new();
//! let mut cache = RemoteCache::new(FakeConnector::new(FakeStore::new(control.to_clock())));
//! cache.configure(&ConfigParams::from_tuples([("connection.host", "localhost")]));
//! cache.open("t").await?;
//!
//! cache.store("t", "k1", "v1".to_owned(), Duration::from_secs(1)).await?;
//! control.advance(Duration::from_secs(1));
//! assert_eq!(cache.retrieve::<String>("t", "k1").await?, None);
//! # Ok::<(), memstash::Error>(())
//! # });
//! ```
//!
//! # Features
//!
//! - `memcached` (default): the [`MemcachedCache`] and [`MemcachedLock`] adapters.
//! - `test-util`: in-memory store and clock control for tests.

mod cache;
mod connection;
pub mod error;
mod lock;
mod options;

#[doc(inline)]
pub use cache::{Cache, RemoteCache};
#[doc(inline)]
pub use connection::{Connection, LifecycleState};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use lock::{AcquirePolicy, Lock, RemoteLock};
#[cfg(feature = "memcached")]
#[doc(inline)]
pub use memstash_memcached::{MemcachedClient, MemcachedConnector, MemcachedOptions};
#[doc(inline)]
pub use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, Endpoint};
#[doc(inline)]
pub use options::{AdapterOptions, DEFAULT_CACHE_TTL, DEFAULT_LOCK_RETRY_INTERVAL};

/// A [`RemoteCache`] backed by memcached.
#[cfg(feature = "memcached")]
pub type MemcachedCache = RemoteCache<MemcachedConnector>;

/// A [`RemoteLock`] backed by memcached.
#[cfg(feature = "memcached")]
pub type MemcachedLock = RemoteLock<MemcachedConnector>;
