// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Storage contract for `cachedupe` backends.
//!
//! This crate defines the [`Storage`] trait every backing store must satisfy, the opaque
//! [`Error`] type storage operations fail with, and [`DynamicStorage`], a clonable type-erased
//! wrapper so several coalescing engines can share one store without knowing its concrete type.
//!
//! # References
//!
//! Besides keyed values with a time-to-live, a storage keeps an index of *references*: opaque
//! strings attached to an entry when it is set. [`Storage::invalidate`] removes every key tagged
//! with any of the given references, which makes it possible to drop a whole group of derived
//! results when the data they were computed from changes.
//!
//! # Implementing a Storage
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//! use std::time::Duration;
//!
//! use cachedupe_storage::{Error, Storage};
//!
//! struct Unindexed<V>(Mutex<HashMap<String, V>>);
//!
//! impl<V: Clone + Send + Sync> Storage<V> for Unindexed<V> {
//!     async fn get(&self, key: &str) -> Result<Option<V>, Error> {
//!         Ok(self.0.lock().unwrap().get(key).cloned())
//!     }
//!
//!     async fn set(&self, key: &str, value: V, ttl: Duration, _references: &[String]) -> Result<(), Error> {
//!         if !ttl.is_zero() {
//!             self.0.lock().unwrap().insert(key.to_owned(), value);
//!         }
//!         Ok(())
//!     }
//!
//!     async fn remove(&self, key: &str) -> Result<bool, Error> {
//!         Ok(self.0.lock().unwrap().remove(key).is_some())
//!     }
//!
//!     async fn invalidate(&self, _references: &[String]) -> Result<Vec<String>, Error> {
//!         Ok(Vec::new())
//!     }
//!
//!     async fn clear(&self, prefix: Option<&str>) -> Result<Vec<String>, Error> {
//!         let mut map = self.0.lock().unwrap();
//!         let removed: Vec<String> = map
//!             .keys()
//!             .filter(|key| prefix.is_none_or(|prefix| key.starts_with(prefix)))
//!             .cloned()
//!             .collect();
//!         for key in &removed {
//!             map.remove(key);
//!         }
//!         Ok(removed)
//!     }
//!
//!     async fn refresh(&self) -> Result<(), Error> {
//!         self.0.lock().unwrap().clear();
//!         Ok(())
//!     }
//! }
//! ```

mod dynamic;
pub mod error;
pub(crate) mod storage;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use dynamic::{DynamicStorage, DynamicStorageExt};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use storage::Storage;
