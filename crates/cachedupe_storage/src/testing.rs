// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock storage implementation for testing.
//!
//! This module provides [`MockStorage`], an in-memory storage that records all
//! operations and supports failure injection for testing error paths.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{Error, Storage};

/// Recorded storage operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// A get operation was performed with the given key.
    Get(String),
    /// A set operation was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The TTL the entry was written with.
        ttl: Duration,
        /// The references the entry was tagged with.
        references: Vec<String>,
    },
    /// A remove operation was performed with the given key.
    Remove(String),
    /// An invalidate operation was performed with the given references.
    Invalidate(Vec<String>),
    /// A clear operation was performed with the given prefix.
    Clear(Option<String>),
    /// A refresh operation was performed.
    Refresh,
}

type FailPredicate = Box<dyn Fn(&StorageOp) -> bool + Send + Sync>;

struct Entry<V> {
    value: V,
    references: Vec<String>,
}

/// A configurable mock storage for testing.
///
/// Values never expire and there is no capacity bound. All operations are recorded for later
/// verification and any of them can be made to fail.
///
/// # Examples
///
/// ```
/// use cachedupe_storage::{Storage, testing::{MockStorage, StorageOp}};
///
/// # futures::executor::block_on(async {
/// let storage = MockStorage::<i32>::new();
///
/// // Fail only gets
/// storage.fail_when(|op| matches!(op, StorageOp::Get(_)));
/// assert!(storage.get("key").await.is_err());
/// assert!(storage.remove("key").await.is_ok());
/// # });
/// ```
pub struct MockStorage<V> {
    data: Arc<Mutex<HashMap<String, Entry<V>>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl<V> std::fmt::Debug for MockStorage<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStorage")
            .field("entries", &self.data.lock().len())
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl<V> Clone for MockStorage<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
        }
    }
}

impl<V> Default for MockStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MockStorage<V> {
    /// Creates a new empty mock storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true if the storage holds the given key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Sets a predicate that determines which operations fail.
    ///
    /// Failed operations are still recorded but leave the stored data untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StorageOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn check(&self, op: StorageOp) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = format!("mock: {op:?} failed");
        self.operations.lock().push(op);
        if fail { Err(Error::from_message(message)) } else { Ok(()) }
    }

    fn remove_matching(&self, matches: impl Fn(&str, &Entry<V>) -> bool) -> Vec<String> {
        let mut data = self.data.lock();
        let removed: Vec<String> = data.iter().filter(|(k, e)| matches(k, e)).map(|(k, _)| k.clone()).collect();
        for key in &removed {
            data.remove(key);
        }
        removed
    }
}

impl<V> Storage<V> for MockStorage<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        self.check(StorageOp::Get(key.to_owned()))?;
        Ok(self.data.lock().get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: V, ttl: Duration, references: &[String]) -> Result<(), Error> {
        self.check(StorageOp::Set {
            key: key.to_owned(),
            ttl,
            references: references.to_vec(),
        })?;
        if !ttl.is_zero() {
            let entry = Entry {
                value,
                references: references.to_vec(),
            };
            self.data.lock().insert(key.to_owned(), entry);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, Error> {
        self.check(StorageOp::Remove(key.to_owned()))?;
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn invalidate(&self, references: &[String]) -> Result<Vec<String>, Error> {
        self.check(StorageOp::Invalidate(references.to_vec()))?;
        let wanted: HashSet<&String> = references.iter().collect();
        Ok(self.remove_matching(|_, entry| entry.references.iter().any(|r| wanted.contains(r))))
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<Vec<String>, Error> {
        self.check(StorageOp::Clear(prefix.map(str::to_owned)))?;
        Ok(self.remove_matching(|key, _| prefix.is_none_or(|prefix| key.starts_with(prefix))))
    }

    async fn refresh(&self) -> Result<(), Error> {
        self.check(StorageOp::Refresh)?;
        self.data.lock().clear();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.lock().len() as u64)
    }
}
