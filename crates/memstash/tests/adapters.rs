// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end behavior of the cache and lock adapters over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use futures::executor::block_on;
use memstash::{Cache, ConfigParams, ErrorKind, LifecycleState, Lock, RemoteCache, RemoteLock};
use memstash_store::testing::{FakeConnector, FakeStore, StoreOp};
use tick::{Clock, ClockControl};

fn config() -> ConfigParams {
    ConfigParams::from_tuples([("connection.host", "localhost"), ("connection.port", "11211")])
}

fn cache(clock: &Clock) -> (RemoteCache<FakeConnector>, FakeStore) {
    let store = FakeStore::new(clock.clone());
    let mut cache = RemoteCache::new(FakeConnector::new(store.clone()));
    cache.configure(&config());
    (cache, store)
}

fn lock(clock: &Clock) -> (RemoteLock<FakeConnector>, FakeStore) {
    let store = FakeStore::new(clock.clone());
    let mut lock = RemoteLock::new(FakeConnector::new(store.clone()), clock.clone());
    lock.configure(&config());
    (lock, store)
}

#[test]
fn store_retrieve_expire_scenario() {
    let control = ClockControl::new();
    let (cache, _store) = cache(&control.to_clock());

    block_on(async {
        cache.open("123").await.expect("open failed");
        assert!(cache.is_open());

        let stored = cache
            .store("123", "k1", "v1".to_owned(), Duration::from_millis(5000))
            .await
            .expect("store failed");
        assert_eq!(stored.as_deref(), Some("v1"));
        assert_eq!(cache.retrieve::<String>("123", "k1").await.expect("retrieve failed").as_deref(), Some("v1"));

        control.advance(Duration::from_millis(5000));
        assert_eq!(cache.retrieve::<String>("123", "k1").await.expect("retrieve failed"), None);

        cache.close("123");
        assert!(!cache.is_open());
    });
}

#[test]
fn retrieve_of_never_stored_key_is_none() {
    let (cache, _store) = cache(&Clock::new_frozen());
    block_on(async {
        cache.open("t").await.expect("open failed");
        assert_eq!(cache.retrieve::<u64>("t", "never-stored").await.expect("retrieve failed"), None);
    });
}

#[test]
fn default_ttl_is_sixty_seconds() {
    let (cache, store) = cache(&Clock::new_frozen());
    block_on(async {
        cache.open("t").await.expect("open failed");
        cache.store("t", "k", 1_u8, Duration::ZERO).await.expect("store failed");
    });

    assert!(matches!(&store.operations()[..], [StoreOp::Set { ttl, .. }] if *ttl == Duration::from_secs(60)));
}

#[test]
fn removed_key_reads_absent_and_remove_repeats() {
    let (cache, _store) = cache(&Clock::new_frozen());
    block_on(async {
        cache.open("t").await.expect("open failed");
        cache.store("t", "k", 1_u8, Duration::ZERO).await.expect("store failed");
        cache.remove("t", "k").await.expect("remove failed");
        cache.remove("t", "k").await.expect("remove failed");
        assert_eq!(cache.retrieve::<u8>("t", "k").await.expect("retrieve failed"), None);
    });
}

#[test]
fn operations_before_open_and_after_close_fail_without_store_calls() {
    let (cache, store) = cache(&Clock::new_frozen());
    let (lock, lock_store) = lock(&Clock::new_frozen());

    block_on(async {
        let err = cache.retrieve::<u8>("a", "k").await.expect_err("retrieve should fail");
        assert_eq!(err.kind(), ErrorKind::NotOpened);
        let err = lock.try_acquire_lock("b", "k", Duration::ZERO).await.expect_err("acquire should fail");
        assert_eq!(err.kind(), ErrorKind::NotOpened);
        assert_eq!(err.trace_id(), "b");

        lock.open("b").await.expect("open failed");
        lock.close("b");
        let err = lock.release_lock("c", "k").await.expect_err("release should fail");
        assert_eq!(err.kind(), ErrorKind::NotOpened);
        let err = lock
            .acquire_lock("c", "k", Duration::ZERO, Duration::from_secs(1))
            .await
            .expect_err("acquire should fail");
        assert_eq!(err.kind(), ErrorKind::NotOpened);
    });

    assert!(store.operations().is_empty());
    assert!(lock_store.operations().is_empty());
}

#[test]
fn open_without_connection_settings_stays_closed() {
    let mut cache = RemoteCache::new(FakeConnector::new(FakeStore::new(Clock::new_frozen())));
    cache.configure(&ConfigParams::from_tuples([("options.timeout", "1000")]));

    let err = block_on(cache.open("t")).expect_err("open should fail");
    assert_eq!(err.kind(), ErrorKind::NoConnection);
    assert_eq!(err.kind().category(), "ConfigurationError");
    assert_eq!(cache.state(), LifecycleState::Closed);
}

#[test]
fn released_lock_can_be_taken_again() {
    let (lock, _store) = lock(&Clock::new_frozen());
    block_on(async {
        lock.open("t").await.expect("open failed");
        assert!(lock.try_acquire_lock("t", "job", Duration::from_secs(10)).await.expect("acquire failed"));
        lock.release_lock("t", "job").await.expect("release failed");
        assert!(lock.try_acquire_lock("t", "job", Duration::from_secs(10)).await.expect("acquire failed"));
    });
}

#[test]
fn acquire_lock_times_out_or_waits_out_the_holder() {
    let control = ClockControl::new().auto_advance_timers(true);
    let (lock, _store) = lock(&control.to_clock());

    block_on(async {
        lock.open("t").await.expect("open failed");

        assert!(lock.try_acquire_lock("t", "held", Duration::from_secs(3600)).await.expect("acquire failed"));
        let err = lock
            .acquire_lock("t", "held", Duration::from_secs(1), Duration::from_millis(500))
            .await
            .expect_err("acquire should time out");
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        assert_eq!(err.kind().code(), "LOCK_TIMEOUT");

        assert!(lock.try_acquire_lock("t", "short", Duration::from_millis(250)).await.expect("acquire failed"));
        lock.acquire_lock("t", "short", Duration::from_secs(1), Duration::from_millis(500))
            .await
            .expect("acquire should succeed after expiry");
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_try_acquire_has_exactly_one_winner() {
    let (lock, _store) = lock(&Clock::new_frozen());
    lock.open("t").await.expect("open failed");
    let lock = Arc::new(lock);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.try_acquire_lock(&format!("worker-{i}"), "contended", Duration::from_secs(30))
                    .await
                    .expect("acquire failed")
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.expect("task panicked") {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
}
