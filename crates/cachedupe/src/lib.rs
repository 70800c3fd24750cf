// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Cache-aside wrappers for async functions, with request coalescing and reference-based
//! invalidation.
//!
//! A [`Cache`] is a registry of named functions. [`Cache::define`] wraps a producer and returns
//! a [`Handle`]; every call through the handle:
//!
//! 1. derives a cache key from the arguments,
//! 2. joins the execution already in flight for that key, if any,
//! 3. otherwise reads the value from storage and, on a miss, runs the producer and stores its
//!    result together with the references computed for it.
//!
//! Concurrent calls for the same key therefore run the producer at most once, and all of them
//! observe the same value or the same failure. Failures are never stored.
//!
//! # Storage
//!
//! Values are kept as [`serde_json::Value`] in any [`Storage`], so one storage can back
//! functions with different value types. By default a cache uses a bounded
//! [`MemoryStorage`] with least-recently-used eviction. Keys are namespaced as
//! `name~key`, which lets [`Cache::clear`] drop every value of one function.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! use cachedupe::{Cache, DefineOptions};
//! use tick::Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Cache::builder(Clock::new_tokio())
//!     .ttl(Duration::from_secs(60))
//!     .on_dedupe(|key| println!("joined {key}"))
//!     .build();
//!
//! let user = cache.define(
//!     "user",
//!     DefineOptions::new().references(|id: u64, _key, _name: String| async move { vec![format!("user:{id}")] }),
//!     |id: u64, _key| async move { Ok::<_, Infallible>(format!("user #{id}")) },
//! )?;
//!
//! assert_eq!(user.call(7).await?, "user #7");
//!
//! // Served from storage until invalidated.
//! assert_eq!(user.call(7).await?, "user #7");
//! user.invalidate(&["user:7".to_string()]).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Telemetry
//!
//! Hits, misses, joined calls, producer failures and swallowed storage failures are emitted as
//! `tracing` events. With the `metrics` feature, [`CacheBuilder::metrics`] additionally records
//! them as OpenTelemetry metrics.

mod cache;
mod engine;
mod error;
mod key;
mod options;
mod telemetry;

#[doc(inline)]
pub use cache::{Cache, CacheBuilder, RESERVED_NAMES};
#[doc(inline)]
pub use cachedupe_memory::MemoryStorage;
#[doc(inline)]
pub use cachedupe_storage::{DynamicStorage, Storage};
#[doc(inline)]
pub use engine::Handle;
#[doc(inline)]
pub use error::{BoxError, DefineError, Error};
#[doc(inline)]
pub use options::{DefineOptions, Hook};
