// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::Error;

/// Host used when an endpoint does not name one.
pub const DEFAULT_HOST: &str = "localhost";

/// The standard memcached port, used when an endpoint does not name one.
pub const DEFAULT_PORT: u16 = 11211;

/// The network address of one backing server.
///
/// Endpoints come either as a connection URI or as a host/port pair. Both forms are
/// reduced to a single `(host, port)` address by [`Endpoint::address`], with the
/// host defaulting to [`DEFAULT_HOST`] and the port to [`DEFAULT_PORT`].
///
/// # Examples
///
/// ```
/// use memstash_store::Endpoint;
///
/// let uri = Endpoint::uri("memcached://cache-1:11300");
/// assert_eq!(uri.address()?, ("cache-1".to_owned(), 11300));
///
/// let pair = Endpoint::from_parts(None, None);
/// assert_eq!(pair.address()?, ("localhost".to_owned(), 11211));
/// # Ok::<(), memstash_store::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A connection URI such as `memcached://host:port`, `tcp://host:port` or `host:port`.
    Uri(String),
    /// An explicit host and port. A zero port means the default port.
    HostPort {
        /// The server host name or IP address.
        host: String,
        /// The server port.
        port: u16,
    },
}

impl Endpoint {
    /// Creates a URI endpoint.
    #[must_use]
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    /// Creates a host/port endpoint.
    #[must_use]
    pub fn host_port(host: impl Into<String>, port: u16) -> Self {
        Self::HostPort { host: host.into(), port }
    }

    /// Creates a host/port endpoint, filling in defaults for missing parts.
    #[must_use]
    pub fn from_parts(host: Option<&str>, port: Option<u16>) -> Self {
        Self::host_port(
            host.unwrap_or(DEFAULT_HOST),
            port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
        )
    }

    /// Resolves the endpoint into a `(host, port)` address.
    ///
    /// # Errors
    ///
    /// Returns an error when a URI endpoint cannot be parsed or names no host.
    pub fn address(&self) -> Result<(String, u16), Error> {
        match self {
            Self::HostPort { host, port } => {
                let host = if host.is_empty() { DEFAULT_HOST } else { host.as_str() };
                let port = if *port == 0 { DEFAULT_PORT } else { *port };
                Ok((host.to_owned(), port))
            }
            Self::Uri(raw) => {
                let uri: http::Uri = raw
                    .trim()
                    .parse()
                    .map_err(|e| Error::caused_by(format!("invalid endpoint uri '{raw}': {e}")))?;
                let host = uri
                    .host()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| Error::caused_by(format!("endpoint uri '{raw}' does not name a host")))?;
                let port = uri.port_u16().filter(|p| *p != 0).unwrap_or(DEFAULT_PORT);
                Ok((host.to_owned(), port))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => f.write_str(uri),
            Self::HostPort { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
