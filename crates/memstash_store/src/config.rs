// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Flat key/value configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A flat, ordered map of dotted configuration keys to string values.
///
/// Connection settings live under `connection.*` (or `connections.<name>.*` when several
/// servers are configured) and tuning knobs under `options.*`. Keys are case-sensitive.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memstash_store::ConfigParams;
///
/// let config = ConfigParams::from_tuples([
///     ("connection.host", "localhost"),
///     ("options.timeout", "5000"),
/// ]);
///
/// assert_eq!(config.get("connection.host"), Some("localhost"));
/// assert_eq!(
///     config.get_as_duration_millis_or("options.timeout", Duration::ZERO),
///     Duration::from_secs(5)
/// );
///
/// let connection = config.section("connection");
/// assert_eq!(connection.get("host"), Some("localhost"));
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConfigParams {
    values: BTreeMap<String, String>,
}

impl ConfigParams {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from `(key, value)` pairs. Later pairs win.
    #[must_use]
    pub fn from_tuples<K, V>(tuples: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        tuples.into_iter().collect()
    }

    /// Sets a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value for a key, treating empty strings as unset.
    #[must_use]
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Returns the value parsed as `u64`, or `default` when unset or unparseable.
    #[must_use]
    pub fn get_as_u64_or(&self, key: &str, default: u64) -> u64 {
        let Some(raw) = self.get_non_empty(key) else {
            return default;
        };

        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = raw, default, "ignoring non-numeric configuration value");
            default
        })
    }

    /// Returns the value parsed as `u16`, or `None` when unset or unparseable.
    #[must_use]
    pub fn get_as_u16(&self, key: &str) -> Option<u16> {
        let raw = self.get_non_empty(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = raw, "ignoring invalid port configuration value");
                None
            }
        }
    }

    /// Returns the value interpreted as milliseconds, or `default` when unset or unparseable.
    #[must_use]
    pub fn get_as_duration_millis_or(&self, key: &str, default: Duration) -> Duration {
        if self.get_non_empty(key).is_none() {
            return default;
        }

        let default_millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.get_as_u64_or(key, default_millis))
    }

    /// Returns the keys under `prefix.` with the prefix stripped.
    #[must_use]
    pub fn section(&self, prefix: &str) -> Self {
        let dotted = format!("{prefix}.");
        self.values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&dotted).map(|rest| (rest.to_owned(), v.clone())))
            .collect()
    }

    /// Returns the distinct first-level names under `prefix.`, in key order.
    ///
    /// For `connections.a.host` and `connections.b.uri`, `section_names("connections")`
    /// yields `["a", "b"]`.
    #[must_use]
    pub fn section_names(&self, prefix: &str) -> Vec<String> {
        let dotted = format!("{prefix}.");
        let mut names: Vec<String> = Vec::new();

        for key in self.values.keys() {
            if let Some((name, _)) = key.strip_prefix(&dotted).and_then(|rest| rest.split_once('.'))
                && names.last().is_none_or(|last| last != name)
            {
                names.push(name.to_owned());
            }
        }

        names
    }

    /// Returns `true` if no values are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over all `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl fmt::Debug for ConfigParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}
