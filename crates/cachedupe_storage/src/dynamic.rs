// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type-erased storage wrapper.

use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::{Error, Storage, storage::DynStorage};

/// Extension trait for converting any [`Storage`] into a [`DynamicStorage`].
///
/// This trait is automatically implemented for all types that implement `Storage`.
pub trait DynamicStorageExt<V>: Sized {
    /// Converts this storage into a `DynamicStorage`.
    fn into_dynamic(self) -> DynamicStorage<V>;
}

impl<V, T> DynamicStorageExt<V> for T
where
    T: Storage<V> + 'static,
{
    fn into_dynamic(self) -> DynamicStorage<V> {
        DynamicStorage::new(self)
    }
}

/// A clonable storage with type erasure.
///
/// Clones share the same underlying backend, so a `DynamicStorage` can be handed to several
/// producers that must observe each other's entries.
///
/// # Examples
///
/// ```
/// use cachedupe_storage::{DynamicStorage, DynamicStorageExt, Storage};
///
/// fn erase<S: Storage<String> + 'static>(storage: S) -> DynamicStorage<String> {
///     storage.into_dynamic()
/// }
/// ```
pub struct DynamicStorage<V>(Arc<DynStorage<'static, V>>);

impl<V> DynamicStorage<V> {
    /// Creates a new dynamic storage from any [`Storage`] implementation.
    pub fn new<T>(storage: T) -> Self
    where
        T: Storage<V> + 'static,
    {
        Self(DynStorage::new_arc(storage))
    }

    /// Returns `true` if both handles point to the same backend.
    #[must_use]
    pub fn same_backend(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<V> Debug for DynamicStorage<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicStorage").finish_non_exhaustive()
    }
}

impl<V> Clone for DynamicStorage<V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V> Storage<V> for DynamicStorage<V>
where
    V: Send,
{
    async fn get(&self, key: &str) -> Result<Option<V>, Error> {
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: V, ttl: Duration, references: &[String]) -> Result<(), Error> {
        self.0.set(key, value, ttl, references).await
    }

    async fn remove(&self, key: &str) -> Result<bool, Error> {
        self.0.remove(key).await
    }

    async fn invalidate(&self, references: &[String]) -> Result<Vec<String>, Error> {
        self.0.invalidate(references).await
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<Vec<String>, Error> {
        self.0.clear(prefix).await
    }

    async fn refresh(&self) -> Result<(), Error> {
        self.0.refresh().await
    }

    fn len(&self) -> Option<u64> {
        self.0.len()
    }

    fn is_empty(&self) -> Option<bool> {
        self.0.is_empty()
    }
}
