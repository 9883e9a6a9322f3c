// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation for testing.
//!
//! This module provides [`FakeStore`], a [`RemoteStore`] that keeps items in memory,
//! expires them against a [`Clock`], records all operations and supports failure
//! injection, plus [`FakeConnector`] which hands that store to an adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tick::Clock;

use crate::{ConfigParams, Endpoint, Error, RemoteStore, StoreConnector};

/// Recorded store operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// An add-if-absent was performed.
    Add {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: Bytes,
        /// The requested time-to-live.
        ttl: Duration,
    },
    /// An unconditional set was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The value that was written.
        value: Bytes,
        /// The requested time-to-live.
        ttl: Duration,
    },
    /// A get was performed with the given key.
    Get(String),
    /// A delete was performed with the given key.
    Delete(String),
}

impl StoreOp {
    /// Returns the key the operation touched.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Add { key, .. } | Self::Set { key, .. } | Self::Get(key) | Self::Delete(key) => key,
        }
    }
}

#[derive(Debug, Clone)]
struct Item {
    value: Bytes,
    expires_at: Option<Instant>,
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

struct State {
    items: HashMap<String, Item>,
    operations: Vec<StoreOp>,
    fail_when: Option<FailPredicate>,
    reject_sets: bool,
}

/// A configurable in-memory store for testing.
///
/// Items expire once their TTL has elapsed on the store's [`Clock`], so tests drive
/// expiry with `tick::ClockControl` instead of sleeping. Clones share state.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use memstash_store::RemoteStore;
/// use memstash_store::testing::FakeStore;
/// use tick::ClockControl;
/// # futures::executor::block_on(async {
///
/// let control = ClockControl::new();
/// let store = FakeStore::new(control.to_clock());
///
/// store.set("key", Bytes::from_static(b"v"), Duration::from_secs(1)).await?;
/// assert!(store.get("key").await?.is_some());
///
/// control.advance(Duration::from_secs(1));
/// assert!(store.get("key").await?.is_none());
/// # Ok::<(), memstash_store::Error>(())
/// # });
/// ```
#[derive(Clone)]
pub struct FakeStore {
    clock: Clock,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeStore")
            .field("items", &state.items.len())
            .field("operations", &state.operations.len())
            .field("fail_when", &state.fail_when.is_some())
            .field("reject_sets", &state.reject_sets)
            .finish_non_exhaustive()
    }
}

impl FakeStore {
    /// Creates an empty store that expires items against `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(State {
                items: HashMap::new(),
                operations: Vec::new(),
                fail_when: None,
                reject_sets: false,
            })),
        }
    }

    /// Sets a predicate that determines when operations fail with an error.
    ///
    /// Failing operations are still recorded but leave the stored items untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_when = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        self.state.lock().fail_when = None;
    }

    /// Makes every subsequent `set` report not-stored without failing.
    pub fn reject_sets(&self, reject: bool) {
        self.state.lock().reject_sets = reject;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.state.lock().operations.clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    /// Returns `true` if an unexpired item exists for `key`. Not recorded.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.instant();
        self.state.lock().items.get(key).is_some_and(|item| is_live(item, now))
    }

    /// Returns the number of unexpired items. Not recorded.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        let now = self.clock.instant();
        self.state.lock().items.values().filter(|item| is_live(item, now)).count()
    }

    fn record(&self, op: StoreOp) -> Result<MutexGuardState<'_>, Error> {
        let mut state = self.state.lock();
        let fail = state.fail_when.as_ref().is_some_and(|predicate| predicate(&op));
        let key = op.key().to_owned();
        state.operations.push(op);

        if fail {
            return Err(Error::from_message(format!("injected failure for key '{key}'")));
        }

        Ok(state)
    }

    fn item(&self, value: Bytes, ttl: Duration) -> Item {
        Item {
            value,
            expires_at: (!ttl.is_zero()).then(|| self.clock.instant() + ttl),
        }
    }
}

type MutexGuardState<'a> = parking_lot::MutexGuard<'a, State>;

fn is_live(item: &Item, now: Instant) -> bool {
    item.expires_at.is_none_or(|expires_at| now < expires_at)
}

impl RemoteStore for FakeStore {
    async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        let item = self.item(value.clone(), ttl);
        let now = self.clock.instant();
        let mut state = self.record(StoreOp::Add {
            key: key.to_owned(),
            value,
            ttl,
        })?;

        if state.items.get(key).is_some_and(|existing| is_live(existing, now)) {
            return Ok(false);
        }

        state.items.insert(key.to_owned(), item);
        Ok(true)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        let item = self.item(value.clone(), ttl);
        let mut state = self.record(StoreOp::Set {
            key: key.to_owned(),
            value,
            ttl,
        })?;

        if state.reject_sets {
            return Ok(false);
        }

        state.items.insert(key.to_owned(), item);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let now = self.clock.instant();
        let mut state = self.record(StoreOp::Get(key.to_owned()))?;

        match state.items.get(key) {
            Some(item) if is_live(item, now) => Ok(Some(item.value.clone())),
            Some(_) => {
                state.items.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut state = self.record(StoreOp::Delete(key.to_owned()))?;
        state.items.remove(key);
        Ok(())
    }
}

/// A [`StoreConnector`] that hands out clones of one [`FakeStore`].
///
/// Every successful `connect` call records the endpoints it was given, so tests can
/// check what the lifecycle resolved.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    store: FakeStore,
    connections: Arc<Mutex<Vec<Vec<Endpoint>>>>,
    fail: Arc<Mutex<bool>>,
}

impl FakeConnector {
    /// Creates a connector for `store`.
    #[must_use]
    pub fn new(store: FakeStore) -> Self {
        Self {
            store,
            connections: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &FakeStore {
        &self.store
    }

    /// Makes subsequent `connect` calls fail.
    pub fn fail_connect(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Returns the endpoint lists of all successful `connect` calls.
    #[must_use]
    pub fn connections(&self) -> Vec<Vec<Endpoint>> {
        self.connections.lock().clone()
    }
}

impl StoreConnector for FakeConnector {
    type Store = FakeStore;

    async fn connect(&self, _trace_id: &str, endpoints: &[Endpoint], _config: &ConfigParams) -> Result<FakeStore, Error> {
        if *self.fail.lock() {
            return Err(Error::from_message("injected connect failure"));
        }

        for endpoint in endpoints {
            let _ = endpoint.address()?;
        }

        self.connections.lock().push(endpoints.to_vec());
        Ok(self.store.clone())
    }
}
