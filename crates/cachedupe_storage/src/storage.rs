// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for cache storage backends.

use std::time::Duration;

use crate::Error;

/// Trait for storage backends.
///
/// Keys are plain strings. Callers that share one storage between several producers are
/// expected to namespace their keys, which is what makes prefix-scoped [`clear`](Self::clear)
/// useful.
///
/// All operations are required except [`len`](Self::len) and [`is_empty`](Self::is_empty):
/// - `len`: Returns `None` (not all backends track size)
/// - `is_empty`: Delegates to `len`
#[dynosaur::dynosaur(pub(crate) DynStorage = dyn(box) Storage, bridge(none))]
pub trait Storage<V>: Send + Sync {
    /// Gets the live value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent or its entry has expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<V>, Error>> + Send;

    /// Stores `value` under `key` for `ttl`, tagged with `references`.
    ///
    /// A zero `ttl` is a no-op: nothing is written and an existing entry is left untouched.
    /// Storing a key again replaces both its value and its reference set.
    fn set(&self, key: &str, value: V, ttl: Duration, references: &[String]) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes `key`, returning whether an entry was actually removed.
    fn remove(&self, key: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Removes every key tagged with any of `references`, returning the removed keys.
    fn invalidate(&self, references: &[String]) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Removes every key starting with `prefix`, or every key when `prefix` is `None`.
    ///
    /// The prefix is matched literally, it is not a pattern.
    fn clear(&self, prefix: Option<&str>) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Discards all entries and indices unconditionally.
    fn refresh(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns the number of entries, if supported.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Returns `true` if the storage holds no entries.
    ///
    /// Returns `None` for implementations that don't track size.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}
