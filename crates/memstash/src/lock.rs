// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use bytes::Bytes;
use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, RemoteStore, StoreConnector};
use tick::Clock;

use crate::{Connection, DEFAULT_LOCK_RETRY_INTERVAL, Error, ErrorKind, LifecycleState, Result};

const LOCK_MARKER: &[u8] = b"lock";

/// Lease-based mutual exclusion over a distributed store.
///
/// A lock is a marker item written with add-if-absent semantics. It is held until it is
/// released or its TTL elapses. Ownership is not checked: any caller may release any key.
pub trait Lock: Send + Sync {
    /// Makes a single attempt to take the lock on `key`.
    ///
    /// Returns `true` if the lock was taken and `false` if it is already held.
    /// A zero `ttl` takes the lock without expiry.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotOpened`] when not open and [`ErrorKind::Store`] when
    /// the store write fails.
    fn try_acquire_lock(&self, trace_id: &str, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send;

    /// Releases the lock on `key`. Releasing a lock that is not held succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotOpened`] when not open and [`ErrorKind::Store`] when
    /// the store delete fails.
    fn release_lock(&self, trace_id: &str, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Returns the retry policy used by [`acquire_lock`](Self::acquire_lock).
    ///
    /// The default waits [`DEFAULT_LOCK_RETRY_INTERVAL`] on a Tokio-driven clock, so
    /// implementations relying on it must be polled inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Implementations fail with [`ErrorKind::NotOpened`] when not open.
    fn acquire_policy(&self, _trace_id: &str) -> Result<AcquirePolicy> {
        Ok(AcquirePolicy::new(Clock::new_tokio(), DEFAULT_LOCK_RETRY_INTERVAL))
    }

    /// Takes the lock on `key`, retrying until it succeeds or `timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::LockTimeout`] when the lock is still held after `timeout`,
    /// and otherwise as [`try_acquire_lock`](Self::try_acquire_lock) does.
    fn acquire_lock(&self, trace_id: &str, key: &str, ttl: Duration, timeout: Duration) -> impl Future<Output = Result<()>> + Send {
        async move { self.acquire_policy(trace_id)?.acquire(self, trace_id, key, ttl, timeout).await }
    }
}

/// How [`Lock::acquire_lock`] waits between attempts.
///
/// Waiting goes through the [`Clock`], so no thread is blocked and tests can drive the
/// loop with `tick::ClockControl`.
#[derive(Debug, Clone)]
pub struct AcquirePolicy {
    clock: Clock,
    retry_interval: Duration,
}

impl AcquirePolicy {
    /// Creates a policy that sleeps `retry_interval` on `clock` between attempts.
    #[must_use]
    pub fn new(clock: Clock, retry_interval: Duration) -> Self {
        Self { clock, retry_interval }
    }

    /// The pause between two attempts.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Repeats [`Lock::try_acquire_lock`] until it succeeds or `timeout` has elapsed.
    ///
    /// One attempt is always made, even with a zero `timeout`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::LockTimeout`] when the deadline passes, or with the
    /// first error returned by an attempt.
    pub async fn acquire<L>(&self, lock: &L, trace_id: &str, key: &str, ttl: Duration, timeout: Duration) -> Result<()>
    where
        L: Lock + ?Sized,
    {
        let stopwatch = self.clock.stopwatch();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if lock.try_acquire_lock(trace_id, key, ttl).await? {
                return Ok(());
            }

            if stopwatch.elapsed() > timeout {
                tracing::debug!(trace_id, key, attempts, "lock acquisition timed out");
                return Err(Error::new(ErrorKind::LockTimeout, trace_id));
            }

            self.clock.delay(self.retry_interval).await;
        }
    }
}

/// A [`Lock`] backed by a [`RemoteStore`] built by the connector `C`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memstash::{Lock, RemoteLock};
/// use memstash_store::ConfigParams;
/// use memstash_store::testing::{FakeConnector, FakeStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let mut lock = RemoteLock::new(FakeConnector::new(FakeStore::new(clock.clone())), clock);
/// lock.configure(&ConfigParams::from_tuples([("connection.host", "localhost")]));
/// lock.open("trace-1").await?;
///
/// assert!(lock.try_acquire_lock("trace-1", "job", Duration::from_secs(30)).await?);
/// assert!(!lock.try_acquire_lock("trace-2", "job", Duration::from_secs(30)).await?);
///
/// lock.release_lock("trace-1", "job").await?;
/// assert!(lock.try_acquire_lock("trace-2", "job", Duration::from_secs(30)).await?);
/// # Ok::<(), memstash::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct RemoteLock<C: StoreConnector, R = ConfigConnectionResolver> {
    connection: Connection<C, R>,
    clock: Clock,
}

impl<C: StoreConnector> RemoteLock<C> {
    /// Creates a closed lock that resolves endpoints from its configuration.
    ///
    /// `clock` paces the retries of [`Lock::acquire_lock`].
    #[must_use]
    pub fn new(connector: C, clock: Clock) -> Self {
        Self {
            connection: Connection::new(connector),
            clock,
        }
    }
}

impl<C, R> RemoteLock<C, R>
where
    C: StoreConnector,
    R: ConnectionResolver,
{
    /// Creates a closed lock that resolves endpoints through `resolver`.
    #[must_use]
    pub fn with_resolver(connector: C, resolver: R, clock: Clock) -> Self {
        Self {
            connection: Connection::with_resolver(connector, resolver),
            clock,
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

impl<C, R> Lock for RemoteLock<C, R>
where
    C: StoreConnector,
    R: ConnectionResolver,
{
    async fn try_acquire_lock(&self, trace_id: &str, key: &str, ttl: Duration) -> Result<bool> {
        let handle = self.connection.handle(trace_id)?;
        let acquired = handle
            .store
            .add(key, Bytes::from_static(LOCK_MARKER), ttl)
            .await
            .map_err(|e| Error::store(trace_id, e))?;

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if acquired {
            tracing::debug!(trace_id, key, ttl_ms, "lock acquired");
        } else {
            tracing::debug!(trace_id, key, "lock is held");
        }

        Ok(acquired)
    }

    async fn release_lock(&self, trace_id: &str, key: &str) -> Result<()> {
        let handle = self.connection.handle(trace_id)?;
        handle.store.delete(key).await.map_err(|e| Error::store(trace_id, e))?;
        tracing::debug!(trace_id, key, "lock released");
        Ok(())
    }

    fn acquire_policy(&self, trace_id: &str) -> Result<AcquirePolicy> {
        let handle = self.connection.handle(trace_id)?;
        Ok(AcquirePolicy::new(self.clock.clone(), handle.options.retry_interval()))
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use memstash_store::testing::{FakeConnector, FakeStore, StoreOp};
    use tick::ClockControl;

    use super::*;

    fn open_lock(clock: &Clock) -> (RemoteLock<FakeConnector>, FakeStore) {
        let store = FakeStore::new(clock.clone());
        let mut lock = RemoteLock::new(FakeConnector::new(store.clone()), clock.clone());
        lock.configure(&ConfigParams::from_tuples([("connection.host", "localhost")]));
        block_on(lock.open("t")).expect("open failed");
        (lock, store)
    }

    #[test]
    fn writes_marker_with_add() {
        let (lock, store) = open_lock(&Clock::new_frozen());
        block_on(lock.try_acquire_lock("t", "k", Duration::from_secs(3))).expect("acquire failed");

        assert_eq!(
            store.operations(),
            vec![StoreOp::Add {
                key: "k".to_owned(),
                value: Bytes::from_static(b"lock"),
                ttl: Duration::from_secs(3),
            }]
        );
    }

    #[test]
    fn zero_ttl_is_passed_through() {
        let (lock, store) = open_lock(&Clock::new_frozen());
        block_on(lock.try_acquire_lock("t", "k", Duration::ZERO)).expect("acquire failed");

        assert!(matches!(&store.operations()[0], StoreOp::Add { ttl, .. } if ttl.is_zero()));
    }

    #[test]
    fn lock_is_free_again_after_ttl() {
        let control = ClockControl::new();
        let (lock, _store) = open_lock(&control.to_clock());

        block_on(async {
            assert!(lock.try_acquire_lock("t", "k", Duration::from_millis(50)).await.expect("acquire failed"));
            assert!(!lock.try_acquire_lock("t", "k", Duration::from_millis(50)).await.expect("acquire failed"));

            control.advance(Duration::from_millis(50));
            assert!(lock.try_acquire_lock("t", "k", Duration::from_millis(50)).await.expect("acquire failed"));
        });
    }

    #[test]
    fn release_is_owner_blind_and_idempotent() {
        let (lock, _store) = open_lock(&Clock::new_frozen());

        block_on(async {
            assert!(lock.try_acquire_lock("owner", "k", Duration::ZERO).await.expect("acquire failed"));
            lock.release_lock("someone-else", "k").await.expect("release failed");
            lock.release_lock("someone-else", "k").await.expect("second release failed");
            assert!(lock.try_acquire_lock("next", "k", Duration::ZERO).await.expect("acquire failed"));
        });
    }

    #[test]
    fn acquire_times_out_while_held() {
        let control = ClockControl::new().auto_advance_timers(true);
        let clock = control.to_clock();
        let (lock, store) = open_lock(&clock);

        block_on(async {
            assert!(lock.try_acquire_lock("t", "k", Duration::ZERO).await.expect("acquire failed"));
            store.clear_operations();

            let stopwatch = clock.stopwatch();
            let err = lock
                .acquire_lock("t", "k", Duration::ZERO, Duration::from_millis(250))
                .await
                .expect_err("acquire should time out");

            assert_eq!(err.kind(), ErrorKind::LockTimeout);
            assert_eq!(stopwatch.elapsed(), Duration::from_millis(300));
            assert_eq!(store.operations().len(), 4);
        });
    }

    #[test]
    fn acquire_succeeds_once_the_holder_expires() {
        let control = ClockControl::new().auto_advance_timers(true);
        let clock = control.to_clock();
        let (lock, _store) = open_lock(&clock);

        block_on(async {
            assert!(lock.try_acquire_lock("t", "k", Duration::from_millis(150)).await.expect("acquire failed"));

            let stopwatch = clock.stopwatch();
            lock.acquire_lock("t", "k", Duration::ZERO, Duration::from_secs(1))
                .await
                .expect("acquire should succeed");
            assert_eq!(stopwatch.elapsed(), Duration::from_millis(200));
        });
    }

    #[test]
    fn retry_interval_comes_from_configuration() {
        let clock = Clock::new_frozen();
        let mut lock = RemoteLock::new(FakeConnector::new(FakeStore::new(clock.clone())), clock);
        lock.configure(&ConfigParams::from_tuples([
            ("connection.host", "localhost"),
            ("options.retry_timeout", "20"),
        ]));

        let err = lock.acquire_policy("t").expect_err("policy needs an open lock");
        assert_eq!(err.kind(), ErrorKind::NotOpened);

        block_on(lock.open("t")).expect("open failed");
        let policy = lock.acquire_policy("t").expect("policy failed");
        assert_eq!(policy.retry_interval(), Duration::from_millis(20));
    }

    /// Tracks held keys in memory and relies on the provided acquire policy.
    #[derive(Default)]
    struct LocalLock {
        held: parking_lot::Mutex<std::collections::HashSet<String>>,
    }

    impl Lock for LocalLock {
        async fn try_acquire_lock(&self, _trace_id: &str, key: &str, _ttl: Duration) -> Result<bool> {
            Ok(self.held.lock().insert(key.to_owned()))
        }

        async fn release_lock(&self, _trace_id: &str, key: &str) -> Result<()> {
            self.held.lock().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_policy_drives_acquire_lock() {
        let lock = LocalLock::default();

        lock.acquire_lock("t", "k", Duration::ZERO, Duration::ZERO)
            .await
            .expect("free lock should be taken");

        let err = lock
            .acquire_lock("t", "k", Duration::ZERO, Duration::from_millis(10))
            .await
            .expect_err("held lock should time out");
        assert_eq!(err.kind(), ErrorKind::LockTimeout);

        lock.release_lock("t", "k").await.expect("release failed");
        lock.acquire_lock("t", "k", Duration::ZERO, Duration::ZERO)
            .await
            .expect("released lock should be taken");
    }

    #[test]
    fn store_errors_surface_from_acquire() {
        let (lock, store) = open_lock(&Clock::new_frozen());
        store.fail_when(|op| matches!(op, StoreOp::Add { .. }));

        let err = block_on(lock.acquire_lock("t", "k", Duration::ZERO, Duration::from_secs(1))).expect_err("acquire should fail");
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
