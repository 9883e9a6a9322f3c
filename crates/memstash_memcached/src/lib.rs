// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Memcached store client for the `memstash` cache and lock adapters.
//!
//! [`MemcachedConnector`] turns resolved endpoints and the `options.*` configuration keys
//! into a [`MemcachedClient`], which implements [`RemoteStore`](memstash_store::RemoteStore)
//! over one or more memcached servers using the text protocol.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use memstash_memcached::{MemcachedClient, MemcachedOptions};
//! use memstash_store::{Endpoint, RemoteStore};
//! use tick::Clock;
//!
//! # async fn run() -> Result<(), memstash_store::Error> {
//! let client = MemcachedClient::new(
//!     &[Endpoint::host_port("localhost", 11211)],
//!     MemcachedOptions::new().pool_size(2),
//!     Clock::new_tokio(),
//! )?;
//!
//! client.set("greeting", Bytes::from_static(b"hello"), Duration::from_secs(60)).await?;
//! assert!(!client.add("greeting", Bytes::from_static(b"again"), Duration::ZERO).await?);
//! # Ok(())
//! # }
//! ```
//!
//! # Expiration
//!
//! TTLs are sent in whole seconds, rounded up, and capped at
//! [`MAX_RELATIVE_EXPIRATION`] because memcached reads larger values as absolute
//! timestamps. A zero TTL stores the item without expiry.

mod client;
mod connector;
mod options;

#[doc(inline)]
pub use client::MemcachedClient;
#[doc(inline)]
pub use connector::MemcachedConnector;
#[doc(inline)]
pub use options::{MAX_RELATIVE_EXPIRATION, MemcachedOptions};
