// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring in-memory storages.

use std::marker::PhantomData;
use std::num::NonZeroUsize;

use tick::Clock;

use crate::storage::MemoryStorage;

/// Number of entries a storage keeps when no capacity is configured.
pub const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).expect("non-zero literal");

/// Builder for configuring a [`MemoryStorage`].
///
/// # Examples
///
/// ```
/// use cachedupe_memory::MemoryStorage;
/// use tick::Clock;
///
/// let clock = Clock::new_frozen();
/// let storage = MemoryStorage::<String>::builder(clock)
///     .capacity(10_000)
///     .name("user-lookups")
///     .build();
/// ```
#[derive(Debug)]
pub struct MemoryStorageBuilder<V> {
    pub(crate) clock: Clock,
    pub(crate) capacity: NonZeroUsize,
    pub(crate) name: Option<String>,
    _phantom: PhantomData<V>,
}

impl<V> MemoryStorageBuilder<V> {
    /// Creates a new builder with the default capacity.
    ///
    /// The clock drives TTL expiry of every entry written to the storage.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            capacity: DEFAULT_CAPACITY,
            name: None,
            _phantom: PhantomData,
        }
    }

    /// Sets the maximum number of entries.
    ///
    /// Once full, writing a new key evicts the least recently used one. A capacity of zero is
    /// treated as one.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Sets a name for the storage.
    ///
    /// The name is attached to the storage's log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the configured [`MemoryStorage`].
    #[must_use]
    pub fn build(self) -> MemoryStorage<V> {
        MemoryStorage::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let builder = MemoryStorageBuilder::<u8>::new(Clock::new_frozen());
        assert_eq!(builder.capacity, DEFAULT_CAPACITY);
        assert!(builder.name.is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let builder = MemoryStorageBuilder::<u8>::new(Clock::new_frozen()).capacity(0);
        assert_eq!(builder.capacity.get(), 1);
    }

    #[test]
    fn name_is_kept() {
        let builder = MemoryStorageBuilder::<u8>::new(Clock::new_frozen()).name("lookups");
        assert_eq!(builder.name.as_deref(), Some("lookups"));
    }
}
