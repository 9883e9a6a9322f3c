// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle of the remote store handle shared by cache and lock adapters.

use std::sync::Arc;

use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, StoreConnector};
use parking_lot::Mutex;

use crate::{AdapterOptions, Error, ErrorKind};

/// Observable lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No handle is bound. Initial and final state.
    Closed,
    /// Endpoints are being resolved and the store client built.
    Opening,
    /// A live handle is bound; operations are allowed.
    Open,
    /// The handle is being released.
    Closing,
}

/// A bound store client together with the options read when it was opened.
#[derive(Debug)]
pub(crate) struct Handle<S> {
    pub(crate) store: Arc<S>,
    pub(crate) options: AdapterOptions,
}

impl<S> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options,
        }
    }
}

#[derive(Debug)]
enum State<S> {
    Closed,
    Opening(u64),
    Open(Handle<S>),
    Closing,
}

impl<S> State<S> {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            Self::Closed => LifecycleState::Closed,
            Self::Opening(_) => LifecycleState::Opening,
            Self::Open(_) => LifecycleState::Open,
            Self::Closing => LifecycleState::Closing,
        }
    }
}

#[derive(Debug)]
struct Inner<S> {
    state: State<S>,
    next_epoch: u64,
}

/// The open/closed state machine guarding a remote store handle.
///
/// A connection starts [`Closed`](LifecycleState::Closed). [`open`](Self::open) resolves
/// endpoints through the [`ConnectionResolver`], asks the [`StoreConnector`] for a client
/// bound to all of them and moves to [`Open`](LifecycleState::Open).
/// [`close`](Self::close) drops the handle and returns to `Closed`.
///
/// Calling `open` on an open connection is a no-op. Operations started before `close`
/// keep their own reference to the handle and finish normally.
///
/// The state lock is never held across an `.await`, so a half-built handle is never
/// visible: other callers observe `Opening` until the client is fully constructed.
#[derive(Debug)]
pub struct Connection<C: StoreConnector, R = ConfigConnectionResolver> {
    connector: C,
    resolver: R,
    config: ConfigParams,
    inner: Mutex<Inner<C::Store>>,
}

impl<C: StoreConnector> Connection<C> {
    /// Creates a closed connection that resolves endpoints from its configuration.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_resolver(connector, ConfigConnectionResolver::new())
    }
}

impl<C, R> Connection<C, R>
where
    C: StoreConnector,
    R: ConnectionResolver,
{
    /// Creates a closed connection that resolves endpoints through `resolver`.
    #[must_use]
    pub fn with_resolver(connector: C, resolver: R) -> Self {
        Self {
            connector,
            resolver,
            config: ConfigParams::new(),
            inner: Mutex::new(Inner {
                state: State::Closed,
                next_epoch: 0,
            }),
        }
    }

    /// Stores `config` and forwards it to the connection resolver.
    ///
    /// Takes effect on the next [`open`](Self::open). Calling it again replaces the
    /// previous configuration.
    pub fn configure(&mut self, config: &ConfigParams) {
        self.resolver.configure(config);
        self.config = config.clone();
    }

    /// Returns `true` iff a live handle is bound.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().state, State::Open(_))
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state.lifecycle()
    }

    /// Returns the options bound at open time, if open.
    #[must_use]
    pub fn options(&self) -> Option<AdapterOptions> {
        match &self.inner.lock().state {
            State::Open(handle) => Some(handle.options),
            _ => None,
        }
    }

    /// Resolves endpoints and binds a store client to all of them.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NoConnection`] when zero endpoints resolve; the connection stays closed.
    /// - [`ErrorKind::InTransition`] when another `open` is in flight, or when the
    ///   connection was closed before this `open` finished.
    /// - [`ErrorKind::Store`] when resolution or client construction fails.
    pub async fn open(&self, trace_id: &str) -> Result<(), Error> {
        let epoch = {
            let mut inner = self.inner.lock();
            match inner.state {
                State::Open(_) => {
                    tracing::debug!(trace_id, "connection already open");
                    return Ok(());
                }
                State::Opening(_) | State::Closing => return Err(Error::new(ErrorKind::InTransition, trace_id)),
                State::Closed => {
                    let epoch = inner.next_epoch;
                    inner.next_epoch = inner.next_epoch.wrapping_add(1);
                    inner.state = State::Opening(epoch);
                    epoch
                }
            }
        };

        // Resets the state if this future fails or is dropped half-way.
        let guard = OpeningGuard { inner: &self.inner, epoch };
        let handle = self.connect(trace_id).await?;

        let mut inner = self.inner.lock();
        match inner.state {
            State::Opening(current) if current == epoch => {
                inner.state = State::Open(handle);
                drop(inner);
                std::mem::forget(guard);
                tracing::info!(trace_id, "connection opened");
                Ok(())
            }
            _ => {
                drop(inner);
                std::mem::forget(guard);
                tracing::warn!(trace_id, "connection closed while opening, discarding client");
                Err(Error::new(ErrorKind::InTransition, trace_id))
            }
        }
    }

    async fn connect(&self, trace_id: &str) -> Result<Handle<C::Store>, Error> {
        let endpoints = self
            .resolver
            .resolve_all(trace_id)
            .await
            .map_err(|e| Error::store(trace_id, e))?;

        if endpoints.is_empty() {
            return Err(Error::new(ErrorKind::NoConnection, trace_id));
        }

        let store = self
            .connector
            .connect(trace_id, &endpoints, &self.config)
            .await
            .map_err(|e| Error::store(trace_id, e))?;

        tracing::debug!(trace_id, endpoints = endpoints.len(), "store client bound");

        Ok(Handle {
            store: Arc::new(store),
            options: AdapterOptions::from_config(&self.config),
        })
    }

    /// Releases the handle and returns to [`Closed`](LifecycleState::Closed).
    ///
    /// Closing a closed connection does nothing. Closing while an `open` is in flight
    /// makes that `open` fail with [`ErrorKind::InTransition`].
    pub fn close(&self, trace_id: &str) {
        let previous = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.state, State::Closing)
        };

        let was_open = matches!(previous, State::Open(_));
        drop(previous);
        self.inner.lock().state = State::Closed;

        if was_open {
            tracing::info!(trace_id, "connection closed");
        }
    }

    /// Returns the bound handle, failing fast when not open.
    pub(crate) fn handle(&self, trace_id: &str) -> Result<Handle<C::Store>, Error> {
        match &self.inner.lock().state {
            State::Open(handle) => Ok(handle.clone()),
            _ => Err(Error::new(ErrorKind::NotOpened, trace_id)),
        }
    }
}

struct OpeningGuard<'a, S> {
    inner: &'a Mutex<Inner<S>>,
    epoch: u64,
}

impl<S> Drop for OpeningGuard<'_, S> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, State::Opening(current) if current == self.epoch) {
            inner.state = State::Closed;
        }
    }
}
