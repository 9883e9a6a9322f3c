// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for turning configuration into server addresses.

use memstash_store::{ConfigConnectionResolver, ConfigParams, ConnectionResolver, DEFAULT_PORT, Endpoint, Error};

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    futures::executor::block_on(f)
}

fn addresses(config: &ConfigParams) -> Result<Vec<(String, u16)>, Error> {
    let mut resolver = ConfigConnectionResolver::new();
    resolver.configure(config);
    block_on(resolver.resolve_all("resolution-test"))?
        .iter()
        .map(Endpoint::address)
        .collect()
}

#[test]
fn mixed_uri_and_host_port_sections() -> Result<(), Error> {
    let config = ConfigParams::from_tuples([
        ("connection.host", "primary"),
        ("connections.b.uri", "memcached://replica-b"),
        ("connections.c.uri", "tcp://replica-c:11300"),
        ("connections.d.port", "12000"),
    ]);

    assert_eq!(
        addresses(&config)?,
        vec![
            ("primary".to_owned(), DEFAULT_PORT),
            ("replica-b".to_owned(), DEFAULT_PORT),
            ("replica-c".to_owned(), 11300),
            ("localhost".to_owned(), 12000),
        ]
    );
    Ok(())
}

#[test]
fn invalid_port_falls_back_to_default() -> Result<(), Error> {
    let config = ConfigParams::from_tuples([("connection.host", "h"), ("connection.port", "not-a-port")]);
    assert_eq!(addresses(&config)?, vec![("h".to_owned(), DEFAULT_PORT)]);
    Ok(())
}

#[test]
fn option_keys_do_not_create_endpoints() -> Result<(), Error> {
    let config = ConfigParams::from_tuples([("options.timeout", "1000"), ("options.pool_size", "2")]);
    assert!(addresses(&config)?.is_empty());
    Ok(())
}
