// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Remote key-value store abstractions for building cache and lock adapters.
//!
//! This crate defines the [`RemoteStore`] trait that every backing store client must
//! satisfy, the [`StoreConnector`] that binds such a client to a set of [`Endpoint`]s,
//! and the [`ConnectionResolver`] that turns flat [`ConfigParams`] into those endpoints.
//!
//! # Overview
//!
//! The store abstraction separates the network client from the adapter semantics. Implement
//! [`RemoteStore`] for your client, then use `memstash` to add the open/closed lifecycle,
//! typed cache operations and lease-based locks on top.
//!
//! A store offers four primitives, each keyed by string and each item carrying a TTL
//! (a zero TTL means the item never expires):
//!
//! - [`RemoteStore::add`] stores only if no unexpired value exists (the locking primitive).
//! - [`RemoteStore::set`] stores unconditionally.
//! - [`RemoteStore::get`] reads a value, `None` when absent or expired.
//! - [`RemoteStore::delete`] removes a value, succeeding when the key is already absent.
//!
//! # Resolving Endpoints
//!
//! ```
//! use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, Endpoint};
//! # futures::executor::block_on(async {
//!
//! let mut resolver = ConfigConnectionResolver::new();
//! resolver.configure(&ConfigParams::from_tuples([
//!     ("connection.host", "cache.internal"),
//!     ("connection.port", "11212"),
//! ]));
//!
//! let endpoints = resolver.resolve_all("trace-1").await?;
//! assert_eq!(endpoints, vec![Endpoint::host_port("cache.internal", 11212)]);
//! # Ok::<(), memstash_store::Error>(())
//! # });
//! ```
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::FakeStore`], an in-memory store that
//! honours TTLs against a `tick` clock, records every operation and supports failure
//! injection.

mod config;
mod endpoint;
pub mod error;
mod resolver;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use config::ConfigParams;
#[doc(inline)]
pub use endpoint::{DEFAULT_HOST, DEFAULT_PORT, Endpoint};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use resolver::{ConfigConnectionResolver, ConnectionResolver, Discovery, NoDiscovery};
#[doc(inline)]
pub use store::{RemoteStore, StoreConnector};
