// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache and lock adapters.

use std::fmt;

use recoverable::{Recovery, RecoveryInfo};

/// What went wrong in an adapter operation.
///
/// Each kind maps to an error category and a stable code, see [`ErrorKind::category`]
/// and [`ErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// `open` resolved zero endpoints.
    NoConnection,
    /// An operation was invoked while the adapter was not open.
    NotOpened,
    /// `open` raced with another `open` or with `close`.
    InTransition,
    /// `acquire_lock` ran past its deadline without taking the lock.
    LockTimeout,
    /// A value could not be encoded or decoded.
    Serialization,
    /// The remote store client failed. The store error is attached as the cause.
    Store,
}

impl ErrorKind {
    /// Returns the stable machine-readable code, such as `NOT_OPENED`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoConnection => "NO_CONNECTION",
            Self::NotOpened => "NOT_OPENED",
            Self::InTransition => "IN_TRANSITION",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::Serialization => "SERIALIZATION",
            Self::Store => "STORE",
        }
    }

    /// Returns the error category the code belongs to.
    #[must_use]
    pub const fn category(self) -> &'static str {
        match self {
            Self::NoConnection => "ConfigurationError",
            Self::NotOpened | Self::InTransition => "InvalidStateError",
            Self::LockTimeout => "ConflictError",
            Self::Serialization => "SerializationError",
            Self::Store => "InfrastructureError",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::NoConnection => "connection is not configured",
            Self::NotOpened => "connection is not opened",
            Self::InTransition => "connection is opening or closing",
            Self::LockTimeout => "acquiring lock failed on timeout",
            Self::Serialization => "value could not be serialized",
            Self::Store => "remote store operation failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.category(), self.code(), self.message())
    }
}

/// An error from a cache or lock adapter.
///
/// Carries the [`ErrorKind`] and the trace identifier of the call that failed.
/// Store failures keep the original store error as their cause.
///
/// # Examples
///
/// ```
/// use memstash::{ErrorKind, RemoteCache};
/// use memstash::Cache;
/// use memstash_store::testing::{FakeConnector, FakeStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let cache = RemoteCache::new(FakeConnector::new(FakeStore::new(Clock::new_frozen())));
/// let err = cache.retrieve::<String>("trace-7", "key").await.unwrap_err();
///
/// assert_eq!(err.kind(), ErrorKind::NotOpened);
/// assert_eq!(err.kind().code(), "NOT_OPENED");
/// assert_eq!(err.trace_id(), "trace-7");
/// # });
/// ```
#[ohno::error]
#[display("{kind} (trace id: '{trace_id}')")]
pub struct Error {
    kind: ErrorKind,
    trace_id: String,
}

impl Error {
    /// Returns what went wrong.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the trace identifier passed to the failing call.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub(crate) fn store(trace_id: &str, cause: memstash_store::Error) -> Self {
        Self::caused_by(ErrorKind::Store, trace_id, cause)
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::LockTimeout | ErrorKind::InTransition | ErrorKind::Store => RecoveryInfo::retry(),
            ErrorKind::NoConnection | ErrorKind::NotOpened | ErrorKind::Serialization => RecoveryInfo::never(),
        }
    }
}

/// A specialized [`Result`] type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;
