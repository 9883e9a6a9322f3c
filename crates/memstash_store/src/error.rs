// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for remote store operations.

/// An error from a remote store operation.
///
/// This is an opaque error that wraps whatever the underlying client reported
/// (an I/O failure, a protocol error, a malformed endpoint). Use
/// [`std::error::Error::source()`] to reach the underlying cause.
///
/// # Example
///
/// ```
/// use memstash_store::Error;
///
/// let error = Error::from_message("connection reset by peer");
/// ```
#[ohno::error]
pub struct Error {}

impl Error {
    /// Creates a new error from any type that can be converted to an error.
    ///
    /// This is the public API for creating store errors from client crates.
    ///
    /// # Examples
    ///
    /// ```
    /// use memstash_store::Error;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    /// let error = Error::from_message(io);
    /// ```
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}

/// A specialized [`Result`] type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
