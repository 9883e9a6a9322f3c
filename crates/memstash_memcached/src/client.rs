// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_memcached::{AsciiProtocol, Client, Status};
use bytes::Bytes;
use memstash_store::{Endpoint, Error, RemoteStore};
use parking_lot::Mutex;
use tick::{Clock, FutureExt};

use crate::MemcachedOptions;

/// A memcached client spread over one or more servers.
///
/// Keys are routed to a server by hashing, so each key always lives on the same server
/// while the server list is unchanged. Every server keeps a small pool of connections
/// that are established on first use, re-established after a failure or after sitting
/// idle, and handed out round-robin.
///
/// A server that fails [`failures`](MemcachedOptions::failures) times in a row is
/// skipped for [`retry`](MemcachedOptions::retry); calls routed to it fail fast.
///
/// Connection failures are retried up to [`retries`](MemcachedOptions::retries) times.
/// A command that fails after it was sent is only resent when repeating it is harmless,
/// so an `add` whose reply was lost is reported as an error rather than sent twice.
///
/// Keys longer than [`max_key_size`](MemcachedOptions::max_key_size) or containing
/// whitespace or control characters, and values larger than
/// [`max_value`](MemcachedOptions::max_value), never reach the network: writes report
/// not-stored, reads report absent and deletes do nothing.
pub struct MemcachedClient {
    servers: Vec<Server>,
    options: MemcachedOptions,
    clock: Clock,
}

impl fmt::Debug for MemcachedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedClient")
            .field("servers", &self.servers.iter().map(|s| s.address.as_str()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

struct Server {
    address: String,
    slots: Vec<tokio::sync::Mutex<Option<Pooled>>>,
    next_slot: AtomicUsize,
    health: Mutex<Health>,
}

struct Pooled {
    client: Client,
    last_used: Instant,
}

#[derive(Debug, Default)]
struct Health {
    consecutive_failures: u32,
    dead_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum Command<'a> {
    Get(&'a str),
    Set { key: &'a str, value: &'a [u8], expiration: i64 },
    Add { key: &'a str, value: &'a [u8], expiration: i64 },
    Delete(&'a str),
}

impl Command<'_> {
    /// Whether sending the command twice has the same effect as sending it once.
    fn is_idempotent(self) -> bool {
        !matches!(self, Self::Add { .. })
    }
}

/// Where a call failed, which decides whether it may be retried.
#[derive(Debug)]
enum Failure {
    /// No connection could be established; nothing was sent.
    Connect(Error),
    /// The command may have reached the server.
    Command(Error),
}

impl Failure {
    fn retryable(&self, command: Command<'_>) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Command(_) => command.is_idempotent(),
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Connect(error) | Self::Command(error) => error,
        }
    }
}

#[derive(Debug)]
enum Reply {
    Value(Option<Bytes>),
    Stored(bool),
    Done,
}

impl Reply {
    fn into_value(self) -> Option<Bytes> {
        match self {
            Self::Value(value) => value,
            Self::Stored(_) | Self::Done => None,
        }
    }

    fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(true))
    }
}

impl MemcachedClient {
    /// Creates a client for `endpoints` without opening any connection yet.
    ///
    /// # Errors
    ///
    /// Returns an error when `endpoints` is empty or an endpoint has no usable host.
    pub fn new(endpoints: &[Endpoint], options: MemcachedOptions, clock: Clock) -> Result<Self, Error> {
        if endpoints.is_empty() {
            return Err(Error::from_message("no memcached endpoints given"));
        }

        let servers = endpoints
            .iter()
            .map(|endpoint| {
                let (host, port) = endpoint.address()?;
                let address = if host.contains(':') && !host.starts_with('[') {
                    format!("[{host}]:{port}")
                } else {
                    format!("{host}:{port}")
                };

                Ok(Server {
                    address,
                    slots: (0..options.pool_size).map(|_| tokio::sync::Mutex::new(None)).collect(),
                    next_slot: AtomicUsize::new(0),
                    health: Mutex::new(Health::default()),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { servers, options, clock })
    }

    /// Returns the `host:port` addresses of all servers, in routing order.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.address.as_str())
    }

    /// Returns the options the client was built with.
    #[must_use]
    pub fn options(&self) -> &MemcachedOptions {
        &self.options
    }

    fn route(&self, key: &str) -> &Server {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
        let len = self.servers.len() as u64;
        // The remainder is below the server count, which came from a usize.
        let index = usize::try_from(hash % len).unwrap_or_default();
        &self.servers[index]
    }

    fn accepts_key(&self, key: &str) -> bool {
        !key.is_empty() && key.len() <= self.options.max_key_size && key.bytes().all(|b| b.is_ascii_graphic() || b >= 0x80)
    }

    fn accepts_value(&self, value: &[u8]) -> bool {
        value.len() <= self.options.max_value
    }

    async fn call(&self, key: &str, command: Command<'_>) -> Result<Reply, Error> {
        let server = self.route(key);
        server.check_alive(self.clock.instant())?;

        let mut pooled = server.next_slot().lock().await;
        let mut attempt: u32 = 0;

        loop {
            match self.attempt(server, &mut pooled, command).await {
                Ok(reply) => {
                    server.record_success();
                    return Ok(reply);
                }
                Err(failure) => {
                    *pooled = None;
                    let marked_dead = server.record_failure(self.clock.instant(), &self.options);
                    let retryable = failure.retryable(command);
                    let error = failure.into_error();

                    if marked_dead || !retryable || attempt >= self.options.retries {
                        tracing::warn!(server = %server.address, key, attempts = attempt + 1, %error, "memcached call failed");
                        return Err(error);
                    }

                    attempt += 1;
                    tracing::debug!(server = %server.address, attempt, %error, "reconnecting to memcached");
                    self.clock.delay(self.options.reconnect).await;
                }
            }
        }
    }

    async fn attempt(&self, server: &Server, pooled: &mut Option<Pooled>, command: Command<'_>) -> Result<Reply, Failure> {
        let now = self.clock.instant();
        let stale = pooled
            .as_ref()
            .is_none_or(|p| now.saturating_duration_since(p.last_used) >= self.options.idle);

        if stale {
            *pooled = None;
            let dsn = format!("tcp://{}", server.address);
            let client = self.bounded(Client::new(&dsn)).await.map_err(Failure::Connect)?;
            tracing::debug!(server = %server.address, "memcached connection established");
            *pooled = Some(Pooled { client, last_used: now });
        }

        let Some(entry) = pooled.as_mut() else {
            return Err(Failure::Connect(Error::from_message(format!(
                "no connection to memcached server {}",
                server.address
            ))));
        };

        let reply = self
            .bounded(execute(&mut entry.client, command))
            .await
            .map_err(Failure::Command)?;
        entry.last_used = self.clock.instant();
        Ok(reply)
    }

    async fn bounded<T, F>(&self, future: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, async_memcached::Error>> + Send,
    {
        match self.options.operation_timeout {
            Some(timeout) => future
                .timeout(&self.clock, timeout)
                .await
                .map_err(Error::from_message)?
                .map_err(Error::from_message),
            None => future.await.map_err(Error::from_message),
        }
    }
}

impl Server {
    fn next_slot(&self) -> &tokio::sync::Mutex<Option<Pooled>> {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        &self.slots[index]
    }

    fn check_alive(&self, now: Instant) -> Result<(), Error> {
        let mut health = self.health.lock();
        match health.dead_until {
            Some(until) if now < until => Err(Error::from_message(format!(
                "memcached server {} is marked dead for another {:?}",
                self.address,
                until.saturating_duration_since(now)
            ))),
            Some(_) => {
                health.dead_until = None;
                tracing::info!(server = %self.address, "retrying memcached server");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_success(&self) {
        self.health.lock().consecutive_failures = 0;
    }

    /// Returns `true` when this failure marks the server dead.
    fn record_failure(&self, now: Instant, options: &MemcachedOptions) -> bool {
        let mut health = self.health.lock();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);

        if options.failures == 0 || health.consecutive_failures < options.failures {
            return false;
        }

        health.consecutive_failures = 0;
        health.dead_until = now.checked_add(options.retry);
        tracing::warn!(server = %self.address, retry_ms = retry_millis(options.retry), "memcached server marked dead");
        true
    }
}

fn retry_millis(retry: Duration) -> u64 {
    u64::try_from(retry.as_millis()).unwrap_or(u64::MAX)
}

async fn execute(client: &mut Client, command: Command<'_>) -> Result<Reply, async_memcached::Error> {
    match command {
        Command::Get(key) => client
            .get(key)
            .await
            .map(|value| Reply::Value(value.and_then(|v| v.data).map(Bytes::from))),
        Command::Set { key, value, expiration } => stored(client.set(key, value, Some(expiration), None).await),
        Command::Add { key, value, expiration } => stored(client.add(key, value, Some(expiration), None).await),
        Command::Delete(key) => match client.delete(key).await {
            Ok(()) | Err(async_memcached::Error::Protocol(Status::NotFound)) => Ok(Reply::Done),
            Err(error) => Err(error),
        },
    }
}

fn stored(result: Result<(), async_memcached::Error>) -> Result<Reply, async_memcached::Error> {
    match result {
        Ok(()) => Ok(Reply::Stored(true)),
        // The server declined the write; any other status is a failure.
        Err(async_memcached::Error::Protocol(Status::NotStored | Status::Exists)) => Ok(Reply::Stored(false)),
        Err(error) => Err(error),
    }
}

impl RemoteStore for MemcachedClient {
    async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        if !self.accepts_key(key) || !self.accepts_value(&value) {
            tracing::debug!(key, size = value.len(), "memcached add rejected locally");
            return Ok(false);
        }

        let expiration = self.options.expiration_secs(ttl);
        let reply = self.call(key, Command::Add { key, value: &value, expiration }).await?;
        Ok(reply.is_stored())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, Error> {
        if !self.accepts_key(key) || !self.accepts_value(&value) {
            tracing::debug!(key, size = value.len(), "memcached set rejected locally");
            return Ok(false);
        }

        let expiration = self.options.expiration_secs(ttl);
        let reply = self.call(key, Command::Set { key, value: &value, expiration }).await?;
        Ok(reply.is_stored())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        if !self.accepts_key(key) {
            return Ok(None);
        }

        Ok(self.call(key, Command::Get(key)).await?.into_value())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        if !self.accepts_key(key) {
            return Ok(());
        }

        self.call(key, Command::Delete(key)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;
    use tick::ClockControl;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    type Script = dyn Fn(usize, &str) -> Option<&'static str> + Send + Sync;

    /// A memcached server on a loopback port that answers from a script.
    ///
    /// The script gets the connection number and the command line. It returns the raw
    /// reply, or `None` to close the connection without answering.
    struct ScriptedServer {
        endpoint: Endpoint,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedServer {
        async fn start(script: impl Fn(usize, &str) -> Option<&'static str> + Send + Sync + 'static) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
            let port = listener.local_addr().expect("no local address").port();
            let commands = Arc::new(Mutex::new(Vec::new()));
            let script: Arc<Script> = Arc::new(script);

            let recorded = Arc::clone(&commands);
            tokio::spawn(async move {
                let mut connection = 0;
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, connection, Arc::clone(&script), Arc::clone(&recorded)));
                    connection += 1;
                }
            });

            Self {
                endpoint: Endpoint::host_port("127.0.0.1", port),
                commands,
            }
        }

        fn client(&self, options: MemcachedOptions) -> MemcachedClient {
            MemcachedClient::new(std::slice::from_ref(&self.endpoint), options, Clock::new_frozen())
                .expect("client construction failed")
        }

        fn count(&self, verb: &str) -> usize {
            self.commands.lock().iter().filter(|c| c.split(' ').next() == Some(verb)).count()
        }
    }

    async fn serve(socket: TcpStream, connection: usize, script: Arc<Script>, commands: Arc<Mutex<Vec<String>>>) {
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let has_data = line.starts_with("set ") || line.starts_with("add ");
            if has_data && !matches!(lines.next_line().await, Ok(Some(_))) {
                return;
            }

            commands.lock().push(line.clone());
            let Some(reply) = script(connection, &line) else {
                return;
            };
            if write.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn client(endpoints: &[Endpoint], options: MemcachedOptions) -> MemcachedClient {
        MemcachedClient::new(endpoints, options, Clock::new_frozen()).expect("client construction failed")
    }

    #[test]
    fn requires_endpoints() {
        MemcachedClient::new(&[], MemcachedOptions::new(), Clock::new_frozen()).expect_err("empty endpoint list");
        MemcachedClient::new(&[Endpoint::uri("/no/host")], MemcachedOptions::new(), Clock::new_frozen())
            .expect_err("endpoint without host");
    }

    #[test]
    fn builds_one_server_per_endpoint() {
        let client = client(
            &[
                Endpoint::host_port("", 0),
                Endpoint::uri("tcp://10.0.0.2:11300"),
                Endpoint::host_port("::1", 11211),
            ],
            MemcachedOptions::new().pool_size(2),
        );

        assert_eq!(client.servers().collect::<Vec<_>>(), ["localhost:11211", "10.0.0.2:11300", "[::1]:11211"]);
        assert!(client.servers.iter().all(|s| s.slots.len() == 2));
    }

    #[test]
    fn routing_is_stable_and_spreads_keys() {
        let client = client(
            &[Endpoint::host_port("a", 1), Endpoint::host_port("b", 1), Endpoint::host_port("c", 1)],
            MemcachedOptions::new(),
        );

        let mut hit = [false; 3];
        for i in 0..64 {
            let key = format!("key-{i}");
            let first = client.route(&key).address.clone();
            assert_eq!(client.route(&key).address, first);
            let index = client.servers.iter().position(|s| s.address == first).expect("routed to a known server");
            hit[index] = true;
        }

        assert_eq!(hit, [true; 3]);
    }

    #[test]
    fn key_rules() {
        let client = client(&[Endpoint::host_port("a", 1)], MemcachedOptions::new().max_key_size(8));

        assert!(client.accepts_key("user:42"));
        assert!(client.accepts_key("12345678"));
        assert!(!client.accepts_key("123456789"));
        assert!(!client.accepts_key(""));
        assert!(!client.accepts_key("has space"));
        assert!(!client.accepts_key("tab\tkey"));
    }

    #[test]
    fn oversized_requests_never_reach_the_network() {
        // Nothing listens on the endpoint; any network call would fail.
        let client = client(
            &[Endpoint::host_port("127.0.0.1", 1)],
            MemcachedOptions::new().max_key_size(4).max_value(2),
        );

        block_on(async {
            assert!(!client.set("k", Bytes::from_static(b"abc"), Duration::ZERO).await.expect("set errored"));
            assert!(!client.add("too-long", Bytes::from_static(b"a"), Duration::ZERO).await.expect("add errored"));
            assert_eq!(client.get("too-long").await.expect("get errored"), None);
            client.delete("too-long").await.expect("delete errored");
        });
    }

    #[test]
    fn failures_mark_a_server_dead_until_retry_elapses() {
        let control = ClockControl::new();
        let server = Server {
            address: "a:1".to_owned(),
            slots: Vec::new(),
            next_slot: AtomicUsize::new(0),
            health: Mutex::new(Health::default()),
        };
        let options = MemcachedOptions::new().failures(2).retry(Duration::from_secs(30));
        let now = control.to_clock().instant();

        assert!(!server.record_failure(now, &options));
        server.record_success();
        assert!(!server.record_failure(now, &options));
        assert!(server.record_failure(now, &options));

        let err = server.check_alive(now).expect_err("server should be dead");
        assert!(format!("{err}").contains("marked dead"));

        control.advance(Duration::from_secs(30));
        server.check_alive(control.to_clock().instant()).expect("server should be retried");
    }

    #[test]
    fn zero_failure_threshold_never_marks_dead() {
        let server = Server {
            address: "a:1".to_owned(),
            slots: Vec::new(),
            next_slot: AtomicUsize::new(0),
            health: Mutex::new(Health::default()),
        };
        let options = MemcachedOptions::new().failures(0);
        let now = Clock::new_frozen().instant();

        for _ in 0..10 {
            assert!(!server.record_failure(now, &options));
        }
        server.check_alive(now).expect("server should stay alive");
    }

    #[tokio::test]
    async fn unreachable_server_fails_then_fails_fast() {
        let client = MemcachedClient::new(
            &[Endpoint::host_port("127.0.0.1", 1)],
            MemcachedOptions::new().retries(0).failures(1),
            Clock::new_frozen(),
        )
        .expect("client construction failed");

        client.get("key").await.expect_err("connection should be refused");
        let err = client.get("key").await.expect_err("server should be skipped");
        assert!(format!("{err}").contains("marked dead"), "got: {err}");
    }

    #[tokio::test]
    async fn server_replies_map_to_store_results() {
        let server = ScriptedServer::start(|_, line| {
            Some(match line.split(' ').take(2).collect::<Vec<_>>()[..] {
                ["add", "fresh"] | ["set", _] => "STORED\r\n",
                ["add", "taken"] => "NOT_STORED\r\n",
                ["delete", "gone"] => "NOT_FOUND\r\n",
                ["delete", _] => "DELETED\r\n",
                ["get", "k"] => "VALUE k 0 2\r\nhi\r\nEND\r\n",
                _ => "END\r\n",
            })
        })
        .await;
        let client = server.client(MemcachedOptions::new());

        assert!(client.add("fresh", Bytes::from_static(b"lock"), Duration::ZERO).await.expect("add failed"));
        assert!(!client.add("taken", Bytes::from_static(b"lock"), Duration::ZERO).await.expect("add failed"));
        assert!(client.set("k", Bytes::from_static(b"hi"), Duration::from_secs(5)).await.expect("set failed"));
        assert_eq!(client.get("k").await.expect("get failed"), Some(Bytes::from_static(b"hi")));
        assert_eq!(client.get("missing").await.expect("get failed"), None);
        client.delete("k").await.expect("delete failed");
        client.delete("gone").await.expect("deleting an absent key failed");
    }

    #[tokio::test]
    async fn server_errors_are_failures() {
        let server = ScriptedServer::start(|_, _| Some("SERVER_ERROR out of memory storing object\r\n")).await;
        let client = server.client(MemcachedOptions::new().retries(0));

        client
            .add("k", Bytes::from_static(b"lock"), Duration::ZERO)
            .await
            .expect_err("add should fail");
        client
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .expect_err("set should fail");
        client.delete("k").await.expect_err("delete should fail");
        client.get("k").await.expect_err("get should fail");
    }

    #[tokio::test]
    async fn add_is_not_resent_after_its_reply_is_lost() {
        // The first connection takes the add and hangs up; later ones see the stored marker.
        let server = ScriptedServer::start(|connection, _| (connection > 0).then_some("NOT_STORED\r\n")).await;
        let client = server.client(MemcachedOptions::new().retries(2).reconnect(Duration::ZERO));

        client
            .add("job", Bytes::from_static(b"lock"), Duration::ZERO)
            .await
            .expect_err("a lost reply should surface");
        assert_eq!(server.count("add"), 1);

        assert!(!client.add("job", Bytes::from_static(b"lock"), Duration::ZERO).await.expect("add failed"));
        assert_eq!(server.count("add"), 2);
    }

    #[tokio::test]
    async fn idempotent_commands_retry_after_a_lost_reply() {
        let server = ScriptedServer::start(|connection, _| (connection > 0).then_some("END\r\n")).await;
        let client = server.client(MemcachedOptions::new().retries(1).reconnect(Duration::ZERO));

        assert_eq!(client.get("k").await.expect("get should be retried"), None);
        assert_eq!(server.count("get"), 2);
    }
}
