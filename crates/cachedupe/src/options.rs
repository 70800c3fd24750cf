// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-function options.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use cachedupe_storage::{DynamicStorage, Storage};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

/// A callback fired with the cache key of a call.
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) type SerializeFn<A> = Arc<dyn Fn(&A) -> Value + Send + Sync>;

pub(crate) type ReferencesFn<A, V> = Arc<dyn Fn(A, String, V) -> BoxFuture<'static, Vec<String>> + Send + Sync>;

/// The callbacks fired as calls are served.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_dedupe: Option<Hook>,
    pub(crate) on_hit: Option<Hook>,
    pub(crate) on_miss: Option<Hook>,
    pub(crate) on_error: Option<Hook>,
}

impl Hooks {
    /// Fills every hook not set here from `defaults`.
    pub(crate) fn or(self, defaults: &Self) -> Self {
        Self {
            on_dedupe: self.on_dedupe.or_else(|| defaults.on_dedupe.clone()),
            on_hit: self.on_hit.or_else(|| defaults.on_hit.clone()),
            on_miss: self.on_miss.or_else(|| defaults.on_miss.clone()),
            on_error: self.on_error.or_else(|| defaults.on_error.clone()),
        }
    }

    pub(crate) fn dedupe(&self, key: &str) {
        fire(self.on_dedupe.as_ref(), key);
    }

    pub(crate) fn hit(&self, key: &str) {
        fire(self.on_hit.as_ref(), key);
    }

    pub(crate) fn miss(&self, key: &str) {
        fire(self.on_miss.as_ref(), key);
    }

    pub(crate) fn error(&self, key: &str) {
        fire(self.on_error.as_ref(), key);
    }
}

fn fire(hook: Option<&Hook>, key: &str) {
    if let Some(hook) = hook {
        hook(key);
    }
}

impl Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_dedupe", &self.on_dedupe.is_some())
            .field("on_hit", &self.on_hit.is_some())
            .field("on_miss", &self.on_miss.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Options for a single cached function.
///
/// Every option left unset falls back to the default configured on the
/// [`CacheBuilder`](crate::CacheBuilder).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachedupe::DefineOptions;
///
/// let options = DefineOptions::<u64, String>::new()
///     .ttl(Duration::from_secs(60))
///     .serialize(|id: &u64| serde_json::json!({ "id": id }))
///     .references(|id: u64, _key: String, _value: String| async move { vec![format!("user:{id}")] })
///     .on_hit(|key: &str| println!("hit {key}"));
/// ```
pub struct DefineOptions<A, V> {
    pub(crate) serialize: Option<SerializeFn<A>>,
    pub(crate) references: Option<ReferencesFn<A, V>>,
    pub(crate) storage: Option<DynamicStorage<Value>>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) dedupe_only: Option<bool>,
    pub(crate) hooks: Hooks,
}

impl<A, V> DefineOptions<A, V> {
    /// Creates options that inherit everything from the cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how arguments are turned into a cache key.
    ///
    /// A returned JSON string is used verbatim as the key; any other value is stringified with
    /// object keys sorted. Without a serializer the arguments themselves are serialized.
    #[must_use]
    pub fn serialize<F>(mut self, serialize: F) -> Self
    where
        F: Fn(&A) -> Value + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(serialize));
        self
    }

    /// Sets how the references of a produced value are computed.
    ///
    /// The function receives the arguments, the cache key and the produced value. The returned
    /// references are stored alongside the value and can later be passed to
    /// [`Handle::invalidate`](crate::Handle::invalidate).
    #[must_use]
    pub fn references<F, Fut>(mut self, references: F) -> Self
    where
        F: Fn(A, String, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        self.references = Some(Arc::new(move |args, key, value| references(args, key, value).boxed()));
        self
    }

    /// Uses `storage` for this function instead of the cache's storage.
    #[must_use]
    pub fn storage(mut self, storage: impl Storage<Value> + 'static) -> Self {
        self.storage = Some(DynamicStorage::new(storage));
        self
    }

    /// Sets how long produced values are stored.
    ///
    /// A TTL below one second only coalesces concurrent calls; values are never written to
    /// storage.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// When `true`, concurrent calls are coalesced but storage is never read or written.
    #[must_use]
    pub fn dedupe_only(mut self, dedupe_only: bool) -> Self {
        self.dedupe_only = Some(dedupe_only);
        self
    }

    /// Fired when a call joins an execution that is already in flight.
    #[must_use]
    pub fn on_dedupe(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_dedupe = Some(Arc::new(hook));
        self
    }

    /// Fired when a value is served from storage.
    #[must_use]
    pub fn on_hit(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_hit = Some(Arc::new(hook));
        self
    }

    /// Fired before the producer runs.
    #[must_use]
    pub fn on_miss(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_miss = Some(Arc::new(hook));
        self
    }

    /// Fired when the producer fails.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }
}

impl<A, V> Default for DefineOptions<A, V> {
    fn default() -> Self {
        Self {
            serialize: None,
            references: None,
            storage: None,
            ttl: None,
            dedupe_only: None,
            hooks: Hooks::default(),
        }
    }
}

impl<A, V> Debug for DefineOptions<A, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefineOptions")
            .field("serialize", &self.serialize.is_some())
            .field("references", &self.references.is_some())
            .field("storage", &self.storage)
            .field("ttl", &self.ttl)
            .field("dedupe_only", &self.dedupe_only)
            .field("hooks", &self.hooks)
            .finish()
    }
}
