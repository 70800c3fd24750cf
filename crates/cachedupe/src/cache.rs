// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The registry of cached functions.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyspawn::Spawner;
use cachedupe_memory::{DEFAULT_CAPACITY, MemoryStorage};
use cachedupe_storage::{DynamicStorage, Storage};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tick::Clock;

use crate::engine::{Engine, EngineConfig, Handle, ProducerFn};
use crate::error::{BoxError, DefineError};
use crate::key::SEPARATOR;
use crate::options::{DefineOptions, Hooks};
use crate::telemetry::Telemetry;

/// Names a function cannot be defined under.
///
/// These are the registry's own operations, plus `get` and `set`, which are held back for by-name
/// access to stored values.
pub const RESERVED_NAMES: &[&str] = &[
    "builder",
    "clear",
    "clear_all",
    "define",
    "get",
    "handle",
    "invalidate",
    "invalidate_all",
    "names",
    "set",
];

/// Type-erased view of an engine, used for operations that span every function.
trait ErasedEngine: Send + Sync {
    fn clear(&self) -> BoxFuture<'_, ()>;

    fn invalidate<'a>(&'a self, references: &'a [String]) -> BoxFuture<'a, Vec<String>>;

    fn storage(&self) -> &DynamicStorage<Value>;
}

impl<A, V> ErasedEngine for Engine<A, V>
where
    A: Serialize + Clone + Send + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn clear(&self) -> BoxFuture<'_, ()> {
        self.clear_all().boxed()
    }

    fn invalidate<'a>(&'a self, references: &'a [String]) -> BoxFuture<'a, Vec<String>> {
        Engine::invalidate(self, references).boxed()
    }

    fn storage(&self) -> &DynamicStorage<Value> {
        Engine::storage(self)
    }
}

struct Registered {
    erased: Arc<dyn ErasedEngine>,
    typed: Arc<dyn Any + Send + Sync>,
}

struct Defaults {
    clock: Clock,
    ttl: Duration,
    storage: DynamicStorage<Value>,
    dedupe_only: bool,
    spawner: Spawner,
    hooks: Hooks,
    telemetry: Telemetry,
}

struct CacheInner {
    defaults: Defaults,
    functions: Mutex<BTreeMap<String, Registered>>,
}

/// A registry of named cached functions.
///
/// Each function defined on the cache gets its own in-flight map and key prefix, and by
/// default shares the cache's storage. Clones share the same registry.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// use cachedupe::{Cache, DefineOptions};
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = Cache::builder(Clock::new_tokio()).ttl(Duration::from_secs(60)).build();
///
/// let double = cache.define("double", DefineOptions::new(), |x: u64, _key: String| async move {
///     Ok::<_, Infallible>(x * 2)
/// })?;
///
/// let (a, b) = tokio::join!(double.call(5), double.call(5));
/// assert_eq!((a?, b?), (10, 10));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("ttl", &self.inner.defaults.ttl)
            .field("dedupe_only", &self.inner.defaults.dedupe_only)
            .field("functions", &self.names())
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Creates a builder for a cache whose storage and timings use `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> CacheBuilder {
        CacheBuilder::new(clock)
    }

    /// Registers `producer` under `name` and returns a handle to call it.
    ///
    /// The producer receives the arguments and the derived cache key.
    ///
    /// # Errors
    ///
    /// Returns a [`DefineError`] if `name` is empty, contains `~`, collides with one of the
    /// cache's operations, or is already defined.
    pub fn define<A, V, F, Fut, E>(
        &self,
        name: impl Into<String>,
        options: DefineOptions<A, V>,
        producer: F,
    ) -> Result<Handle<A, V>, DefineError>
    where
        A: Serialize + Clone + Send + 'static,
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(A, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let name = name.into();
        validate_name(&name)?;

        let mut functions = self.inner.functions.lock();
        if functions.contains_key(&name) {
            return Err(DefineError::Duplicate(name));
        }

        let defaults = &self.inner.defaults;
        let config = EngineConfig {
            name: Arc::from(name.as_str()),
            serialize: options.serialize,
            references: options.references,
            storage: options.storage.unwrap_or_else(|| defaults.storage.clone()),
            ttl: options.ttl.unwrap_or(defaults.ttl),
            dedupe_only: options.dedupe_only.unwrap_or(defaults.dedupe_only),
            hooks: options.hooks.or(&defaults.hooks),
            telemetry: defaults.telemetry.clone(),
            clock: defaults.clock.clone(),
            spawner: defaults.spawner.clone(),
        };
        let producer: ProducerFn<A, V> = Arc::new(move |args, key| {
            producer(args, key)
                .map(|result| result.map_err(Into::<BoxError>::into))
                .boxed()
        });

        let engine = Arc::new(Engine::new(config, producer));
        functions.insert(
            name,
            Registered {
                erased: Arc::clone(&engine) as Arc<dyn ErasedEngine>,
                typed: Arc::clone(&engine) as Arc<dyn Any + Send + Sync>,
            },
        );

        Ok(Handle::new(engine))
    }

    /// Returns the handle of a function defined earlier.
    ///
    /// Returns `None` if no function is registered under `name` or if it was defined with
    /// different argument or value types.
    #[must_use]
    pub fn handle<A, V>(&self, name: &str) -> Option<Handle<A, V>>
    where
        A: Serialize + Clone + Send + 'static,
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let typed = Arc::clone(&self.inner.functions.lock().get(name)?.typed);
        typed.downcast::<Engine<A, V>>().ok().map(Handle::new)
    }

    /// Returns the names of every defined function, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.functions.lock().keys().cloned().collect()
    }

    /// Forgets every value of the function `name`.
    ///
    /// Returns `false` if no function is registered under `name`.
    pub async fn clear(&self, name: &str) -> bool {
        let Some(engine) = self.erased(name) else {
            return false;
        };
        engine.clear().await;
        true
    }

    /// Forgets every value of every function.
    pub async fn clear_all(&self) {
        let engines = self.all_erased();
        join_all(engines.iter().map(|engine| engine.clear())).await;
    }

    /// Removes the entries tagged with any of `references` from the storage of `name`,
    /// returning the removed storage keys.
    pub async fn invalidate(&self, name: &str, references: &[String]) -> Vec<String> {
        match self.erased(name) {
            Some(engine) => engine.invalidate(references).await,
            None => Vec::new(),
        }
    }

    /// Removes the entries tagged with any of `references` from every storage in use,
    /// returning the removed storage keys.
    ///
    /// A storage shared by several functions is invalidated once.
    pub async fn invalidate_all(&self, references: &[String]) -> Vec<String> {
        let mut distinct: Vec<Arc<dyn ErasedEngine>> = Vec::new();
        for engine in self.all_erased() {
            if !distinct.iter().any(|seen| seen.storage().same_backend(engine.storage())) {
                distinct.push(engine);
            }
        }

        join_all(distinct.iter().map(|engine| engine.invalidate(references)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn erased(&self, name: &str) -> Option<Arc<dyn ErasedEngine>> {
        self.inner.functions.lock().get(name).map(|f| Arc::clone(&f.erased))
    }

    fn all_erased(&self) -> Vec<Arc<dyn ErasedEngine>> {
        self.inner.functions.lock().values().map(|f| Arc::clone(&f.erased)).collect()
    }
}

fn validate_name(name: &str) -> Result<(), DefineError> {
    if RESERVED_NAMES.contains(&name) {
        return Err(DefineError::Reserved(name.to_owned()));
    }
    if name.is_empty() {
        return Err(DefineError::InvalidName {
            name: name.to_owned(),
            reason: "name must not be empty",
        });
    }
    if name.contains(SEPARATOR) {
        return Err(DefineError::InvalidName {
            name: name.to_owned(),
            reason: "name must not contain '~'",
        });
    }
    Ok(())
}

/// Builder for a [`Cache`].
///
/// Every setting is a default that [`DefineOptions`] can override per function.
pub struct CacheBuilder {
    clock: Clock,
    ttl: Duration,
    storage: Option<DynamicStorage<Value>>,
    capacity: usize,
    dedupe_only: bool,
    spawner: Option<Spawner>,
    hooks: Hooks,
    telemetry: Telemetry,
}

impl Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("ttl", &self.ttl)
            .field("storage", &self.storage)
            .field("capacity", &self.capacity)
            .field("dedupe_only", &self.dedupe_only)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl CacheBuilder {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            ttl: Duration::ZERO,
            storage: None,
            capacity: DEFAULT_CAPACITY.get(),
            dedupe_only: false,
            spawner: None,
            hooks: Hooks::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// Returns the clock the cache will use.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Sets how long produced values are stored. Defaults to zero, which only coalesces calls.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Uses `storage` instead of an in-memory storage.
    #[must_use]
    pub fn storage(mut self, storage: impl Storage<Value> + 'static) -> Self {
        self.storage = Some(DynamicStorage::new(storage));
        self
    }

    /// Sets the capacity of the in-memory storage created when none is given.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// When `true`, functions coalesce calls without touching storage.
    #[must_use]
    pub fn dedupe_only(mut self, dedupe_only: bool) -> Self {
        self.dedupe_only = dedupe_only;
        self
    }

    /// Sets the spawner executions run on. Defaults to the Tokio runtime.
    #[must_use]
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Default hook fired when a call joins an in-flight execution.
    #[must_use]
    pub fn on_dedupe(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_dedupe = Some(Arc::new(hook));
        self
    }

    /// Default hook fired when a value is served from storage.
    #[must_use]
    pub fn on_hit(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_hit = Some(Arc::new(hook));
        self
    }

    /// Default hook fired before a producer runs.
    #[must_use]
    pub fn on_miss(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_miss = Some(Arc::new(hook));
        self
    }

    /// Default hook fired when a producer fails.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Enables metrics collection using the provided meter provider.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn metrics(mut self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.telemetry = Telemetry::with_meter_provider(provider);
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Calling a function panics if no spawner was set and the call is made outside a Tokio
    /// runtime.
    #[must_use]
    pub fn build(self) -> Cache {
        let storage = self.storage.unwrap_or_else(|| {
            DynamicStorage::new(
                MemoryStorage::<Value>::builder(self.clock.clone())
                    .capacity(self.capacity)
                    .name("cachedupe")
                    .build(),
            )
        });

        Cache {
            inner: Arc::new(CacheInner {
                defaults: Defaults {
                    clock: self.clock,
                    ttl: self.ttl,
                    storage,
                    dedupe_only: self.dedupe_only,
                    spawner: self.spawner.unwrap_or_else(Spawner::new_tokio),
                    hooks: self.hooks,
                    telemetry: self.telemetry,
                },
                functions: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use super::*;
    use crate::telemetry::CacheActivity;
    use crate::telemetry::testing::MetricTester;

    fn cache() -> Cache {
        Cache::builder(Clock::new_frozen()).ttl(Duration::from_secs(60)).build()
    }

    fn define_double(cache: &Cache, name: &str) -> Result<Handle<u64, u64>, DefineError> {
        cache.define(name, DefineOptions::new(), |x: u64, _key: String| async move { Ok::<_, Infallible>(x * 2) })
    }

    #[test]
    fn reserved_names_are_rejected() {
        let cache = cache();
        for name in RESERVED_NAMES {
            assert_eq!(define_double(&cache, name).unwrap_err(), DefineError::Reserved((*name).to_string()));
        }
        assert!(cache.names().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let cache = cache();
        define_double(&cache, "double").unwrap();

        assert_eq!(define_double(&cache, "double").unwrap_err(), DefineError::Duplicate("double".into()));
        assert_eq!(cache.names(), vec!["double"]);
    }

    #[test]
    fn malformed_names_are_rejected() {
        let cache = cache();

        assert!(matches!(define_double(&cache, ""), Err(DefineError::InvalidName { .. })));
        assert!(matches!(define_double(&cache, "a~b"), Err(DefineError::InvalidName { .. })));
    }

    #[test]
    fn handle_is_type_checked() {
        let cache = cache();
        define_double(&cache, "double").unwrap();

        assert!(cache.handle::<u64, u64>("double").is_some());
        assert!(cache.handle::<u64, String>("double").is_none());
        assert!(cache.handle::<u64, u64>("missing").is_none());
    }

    #[test]
    fn options_override_defaults() {
        let cache = Cache::builder(Clock::new_frozen())
            .ttl(Duration::from_secs(60))
            .dedupe_only(true)
            .build();

        let handle = cache
            .define(
                "tuned",
                DefineOptions::new().ttl(Duration::from_secs(5)).dedupe_only(false),
                |x: u64, _key: String| async move { Ok::<_, Infallible>(x) },
            )
            .unwrap();

        let debug = format!("{handle:?}");
        assert!(debug.contains("ttl: 5s"), "{debug}");
        assert!(debug.contains("dedupe_only: false"), "{debug}");
    }

    #[test]
    fn functions_share_the_default_storage() {
        let cache = cache();
        let a = define_double(&cache, "a").unwrap();
        let b = define_double(&cache, "b").unwrap();

        assert!(a.engine().storage().same_backend(b.engine().storage()));
    }

    #[test]
    fn builder_debug_lists_settings() {
        let builder = Cache::builder(Clock::new_frozen()).capacity(16).on_hit(|_key: &str| {});
        let debug = format!("{builder:?}");

        assert!(debug.contains("capacity: 16"), "{debug}");
        assert!(debug.contains("on_hit: true"), "{debug}");
    }

    #[tokio::test]
    async fn calls_are_counted_as_metrics() {
        let tester = MetricTester::new();
        let cache = Cache::builder(Clock::new_frozen())
            .ttl(Duration::from_secs(60))
            .metrics(tester.meter_provider())
            .build();
        let double = define_double(&cache, "double").unwrap();

        assert_eq!(double.call(2).await.unwrap(), 4);
        assert_eq!(double.call(2).await.unwrap(), 4);

        assert_eq!(tester.event_count("double", CacheActivity::Miss), 1);
        assert_eq!(tester.event_count("double", CacheActivity::Hit), 1);
        assert_eq!(tester.produce_count("double"), 1);
    }

    #[tokio::test]
    async fn invalidate_all_visits_shared_storage_once() {
        let cache = cache();
        let tagged = |cache: &Cache, name: &str| {
            cache
                .define(
                    name,
                    DefineOptions::new().references(|x: u64, _key: String, _value: u64| async move { vec![format!("n:{x}")] }),
                    |x: u64, _key: String| async move { Ok::<_, Infallible>(x) },
                )
                .unwrap()
        };
        let a = tagged(&cache, "a");
        let b = tagged(&cache, "b");

        a.call(1).await.unwrap();
        b.call(1).await.unwrap();
        b.call(2).await.unwrap();

        let mut removed = cache.invalidate_all(&["n:1".to_string()]).await;
        removed.sort();

        assert_eq!(removed, vec!["a~1", "b~1"]);
    }
}
