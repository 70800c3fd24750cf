// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded in-memory storage with a reference index.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cachedupe_storage::{Error, Storage};
use lru::LruCache;
use parking_lot::Mutex;
use tick::Clock;

use crate::builder::MemoryStorageBuilder;
use crate::index::ReferenceIndex;

struct Entry<V> {
    value: V,
    ttl: Duration,
    inserted_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

struct State<V> {
    entries: LruCache<String, Entry<V>>,
    index: ReferenceIndex,
}

impl<V> State<V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            index: ReferenceIndex::default(),
        }
    }
}

/// An in-process storage bounded by entry count.
///
/// - Entries expire `ttl` after they were written, measured on the storage's [`Clock`].
/// - When full, writing a new key evicts the least recently used entry.
/// - Every entry may be tagged with references; [`Storage::invalidate`] removes all keys tagged
///   with a reference, and a removed, expired or evicted key is dropped from every reference it
///   was tagged with.
///
/// Clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachedupe_memory::MemoryStorage;
/// use cachedupe_storage::Storage;
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let storage = MemoryStorage::<i32>::new(Clock::new_frozen());
/// let ttl = Duration::from_secs(60);
///
/// storage.set("user~1", 1, ttl, &["users".to_string()]).await?;
/// storage.set("user~2", 2, ttl, &["users".to_string()]).await?;
///
/// let removed = storage.invalidate(&["users".to_string()]).await?;
/// assert_eq!(removed.len(), 2);
/// assert_eq!(storage.get("user~1").await?, None);
/// # Ok::<(), cachedupe_storage::Error>(())
/// # });
/// ```
pub struct MemoryStorage<V> {
    state: Arc<Mutex<State<V>>>,
    clock: Clock,
    capacity: NonZeroUsize,
    name: Option<Arc<str>>,
}

impl<V> Clone for MemoryStorage<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: self.clock.clone(),
            capacity: self.capacity,
            name: self.name.clone(),
        }
    }
}

impl<V> Debug for MemoryStorage<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.state.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl<V> MemoryStorage<V> {
    /// Creates a storage with the default capacity.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::builder(clock).build()
    }

    /// Creates a storage holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(clock: Clock, capacity: usize) -> Self {
        Self::builder(clock).capacity(capacity).build()
    }

    /// Creates a new builder for configuring a storage.
    #[must_use]
    pub fn builder(clock: Clock) -> MemoryStorageBuilder<V> {
        MemoryStorageBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: MemoryStorageBuilder<V>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(builder.capacity))),
            clock: builder.clock,
            capacity: builder.capacity,
            name: builder.name.map(Arc::from),
        }
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns the name given to this storage, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the keys currently tagged with `reference`, sorted.
    #[must_use]
    pub fn keys_for_reference(&self, reference: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.index.keys_of(reference).into_iter().flatten().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the references `key` is tagged with, sorted.
    #[must_use]
    pub fn references_for_key(&self, key: &str) -> Vec<String> {
        let state = self.state.lock();
        state.index.references_of(key).into_iter().flatten().cloned().collect()
    }

    /// Returns the number of distinct references that tag at least one key.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.state.lock().index.reference_count()
    }

    fn storage_name(&self) -> &str {
        self.name.as_deref().unwrap_or("memory")
    }
}

impl<V> Storage<V> for MemoryStorage<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        let now = self.clock.instant();
        let mut state = self.state.lock();

        match state.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // Removed under the same lock as the read, so a concurrent set cannot be undone.
        state.entries.pop(key);
        state.index.unlink_key(key);
        tracing::debug!(storage.name = self.storage_name(), storage.key = key, "storage.expired");
        Ok(None)
    }

    async fn set(&self, key: &str, value: V, ttl: Duration, references: &[String]) -> Result<(), Error> {
        if ttl.is_zero() {
            return Ok(());
        }

        let references: BTreeSet<String> = references.iter().cloned().collect();
        let entry = Entry {
            value,
            ttl,
            inserted_at: self.clock.instant(),
        };

        let mut state = self.state.lock();
        let State { entries, index } = &mut *state;

        if let Some((evicted, _)) = entries.push(key.to_owned(), entry)
            && evicted != key
        {
            index.unlink_key(&evicted);
            tracing::debug!(storage.name = self.storage_name(), storage.key = evicted, "storage.evicted");
        }
        index.relink(key, references);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, Error> {
        let mut state = self.state.lock();
        if state.entries.pop(key).is_none() {
            return Ok(false);
        }
        state.index.unlink_key(key);
        Ok(true)
    }

    async fn invalidate(&self, references: &[String]) -> Result<Vec<String>, Error> {
        let mut state = self.state.lock();
        let State { entries, index } = &mut *state;

        let mut candidates: HashSet<String> = HashSet::new();
        for reference in references {
            if let Some(keys) = index.keys_of(reference) {
                candidates.extend(keys.iter().cloned());
            }
        }

        let removed: Vec<String> = candidates.iter().filter(|key| entries.pop(key.as_str()).is_some()).cloned().collect();
        index.prune(&candidates);
        Ok(removed)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<Vec<String>, Error> {
        let mut state = self.state.lock();
        let State { entries, index } = &mut *state;

        let Some(prefix) = prefix else {
            let removed: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
            entries.clear();
            index.clear();
            return Ok(removed);
        };

        let removed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            entries.pop(key.as_str());
        }
        index.prune(&removed);
        Ok(removed)
    }

    async fn refresh(&self) -> Result<(), Error> {
        *self.state.lock() = State::new(self.capacity);
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.state.lock().entries.len() as u64)
    }
}
