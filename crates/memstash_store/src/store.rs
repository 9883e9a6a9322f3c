// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core traits for remote store clients.

use std::fmt::Debug;
use std::time::Duration;

use bytes::Bytes;

use crate::{ConfigParams, Endpoint, Error};

/// A client handle to one or more backing key-value servers.
///
/// Implementations must be safe for concurrent use: a single handle is shared by
/// every cache and lock operation of an adapter once it is open.
///
/// All four methods are required. A zero `ttl` means the item never expires;
/// otherwise the item reads as absent once `ttl` has elapsed since it was written.
pub trait RemoteStore: Send + Sync {
    /// Stores `value` only if no unexpired value exists for `key`.
    ///
    /// Returns `true` if the value was stored and `false` if the key was taken.
    fn add(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Stores `value` unconditionally, replacing any previous value.
    ///
    /// Returns `false` if the store declined to keep the value.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Gets the value for `key`, or `None` if it is absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;

    /// Deletes the value for `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Builds a [`RemoteStore`] bound to a set of endpoints.
///
/// The connector receives the complete adapter configuration so that store-specific
/// `options.*` keys reach the client untouched.
pub trait StoreConnector: Send + Sync {
    /// The store handle produced by this connector.
    type Store: RemoteStore + Debug + 'static;

    /// Creates a store handle bound to all `endpoints`.
    ///
    /// `endpoints` is never empty when called by the `memstash` lifecycle.
    fn connect(
        &self,
        trace_id: &str,
        endpoints: &[Endpoint],
        config: &ConfigParams,
    ) -> impl Future<Output = Result<Self::Store, Error>> + Send;
}
