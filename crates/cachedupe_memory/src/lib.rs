// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bounded in-process storage with reference-based invalidation.
//!
//! This crate provides [`MemoryStorage`], an implementation of
//! [`cachedupe_storage::Storage`] that keeps a fixed number of entries with least-recently-used
//! eviction, expires each entry after its own TTL, and indexes entries by the references they
//! are tagged with.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use cachedupe_memory::MemoryStorage;
//! use cachedupe_storage::Storage;
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let storage = MemoryStorage::<String>::builder(Clock::new_frozen())
//!     .capacity(100)
//!     .build();
//!
//! storage.set("key", "value".to_string(), Duration::from_secs(30), &[]).await?;
//! assert_eq!(storage.get("key").await?.as_deref(), Some("value"));
//! # Ok::<(), cachedupe_storage::Error>(())
//! # });
//! ```
//!
//! # Guarantees
//!
//! - The two directions of the reference index are exact inverses after every operation.
//! - A key that is removed, invalidated, cleared, evicted or found expired is dropped from every
//!   reference it was tagged with, and references left without keys are dropped too.
//! - All operations on one storage (and its clones) are serialized by a single lock.

pub mod builder;
mod index;
pub mod storage;

#[doc(inline)]
pub use builder::{DEFAULT_CAPACITY, MemoryStorageBuilder};
#[doc(inline)]
pub use storage::MemoryStorage;
