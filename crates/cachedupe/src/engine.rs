// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalescing cache-aside execution for a single named function.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyspawn::Spawner;
use cachedupe_storage::{DynamicStorage, Storage};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tick::Clock;
use tracing::Instrument;

use crate::error::{BoxError, Error};
use crate::key;
use crate::options::{Hooks, ReferencesFn};
use crate::telemetry::{CacheActivity, Telemetry};

/// Values stored for less than this are never written to storage.
pub(crate) const MIN_STORED_TTL: Duration = Duration::from_secs(1);

pub(crate) type ProducerFn<A, V> = Arc<dyn Fn(A, String) -> BoxFuture<'static, Result<V, BoxError>> + Send + Sync>;

type KeyFn<A> = Arc<dyn Fn(&A) -> Result<Value, serde_json::Error> + Send + Sync>;

type Outcome<V> = Shared<BoxFuture<'static, Result<V, Error>>>;

struct InFlight<V> {
    id: u64,
    outcome: Outcome<V>,
}

/// Everything an engine needs besides the producer, resolved against the cache defaults.
pub(crate) struct EngineConfig<A, V> {
    pub(crate) name: Arc<str>,
    pub(crate) serialize: Option<crate::options::SerializeFn<A>>,
    pub(crate) references: Option<ReferencesFn<A, V>>,
    pub(crate) storage: DynamicStorage<Value>,
    pub(crate) ttl: Duration,
    pub(crate) dedupe_only: bool,
    pub(crate) hooks: Hooks,
    pub(crate) telemetry: Telemetry,
    pub(crate) clock: Clock,
    pub(crate) spawner: Spawner,
}

pub(crate) struct Engine<A, V> {
    name: Arc<str>,
    producer: ProducerFn<A, V>,
    key_fn: KeyFn<A>,
    references: Option<ReferencesFn<A, V>>,
    storage: DynamicStorage<Value>,
    ttl: Duration,
    dedupe_only: bool,
    hooks: Hooks,
    telemetry: Telemetry,
    clock: Clock,
    spawner: Spawner,
    in_flight: Mutex<HashMap<String, InFlight<V>>>,
    next_id: AtomicU64,
}

impl<A, V> Engine<A, V>
where
    A: Serialize + Clone + Send + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: EngineConfig<A, V>, producer: ProducerFn<A, V>) -> Self {
        let key_fn: KeyFn<A> = match config.serialize {
            Some(serialize) => Arc::new(move |args: &A| Ok(serialize(args))),
            None => Arc::new(|args: &A| serde_json::to_value(args)),
        };

        Self {
            name: config.name,
            producer,
            key_fn,
            references: config.references,
            storage: config.storage,
            ttl: config.ttl,
            dedupe_only: config.dedupe_only,
            hooks: config.hooks,
            telemetry: config.telemetry,
            clock: config.clock,
            spawner: config.spawner,
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn key_of(&self, args: &A) -> Result<String, Error> {
        let value = (self.key_fn)(args).map_err(|source| Error::key(&self.name, source))?;
        Ok(key::derive(&value))
    }

    /// Joins the execution in flight for the key of `args`, or starts a new one.
    ///
    /// The in-flight entry is registered before this returns, so calls made before the first
    /// one is polled still share its execution.
    pub(crate) fn invoke(self: &Arc<Self>, args: A) -> Result<Outcome<V>, Error> {
        let key = self.key_of(&args)?;

        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(&key) {
            let outcome = entry.outcome.clone();
            drop(in_flight);

            self.telemetry.record(&self.name, &key, CacheActivity::Dedupe);
            self.hooks.dedupe(&key);
            return Ok(outcome);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let name = Arc::clone(&self.name);
        let outcome = async move { receiver.await.unwrap_or(Err(Error::Abandoned { name })) }
            .boxed()
            .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                outcome: outcome.clone(),
            },
        );
        drop(in_flight);

        let engine = Arc::clone(self);
        drop(
            self.spawner
                .spawn(async move { engine.execute(id, args, key, sender).await }.in_current_span()),
        );

        Ok(outcome)
    }

    async fn execute(&self, id: u64, args: A, key: String, sender: oneshot::Sender<Result<V, Error>>) {
        let guard = ForgetOnDrop { engine: self, id, key: &key };
        let outcome = self.produce(args, &key).await;
        drop(guard);

        let failed = outcome.is_err();
        if failed {
            self.telemetry.record(&self.name, &key, CacheActivity::Error);
            self.hooks.error(&key);
        }

        // Every caller may have gone away; the execution still finishes its bookkeeping.
        let _ = sender.send(outcome);

        if failed && !self.dedupe_only {
            let storage_key = key::storage_key(&self.name, &key);
            if let Err(error) = self.storage.remove(&storage_key).await {
                self.storage_failed(&key, "remove", &error);
            }
        }
    }

    async fn produce(&self, args: A, key: &str) -> Result<V, Error> {
        let storage_key = key::storage_key(&self.name, key);

        if !self.dedupe_only
            && let Some(value) = self.lookup(&storage_key, key).await
        {
            self.telemetry.record(&self.name, key, CacheActivity::Hit);
            self.hooks.hit(key);
            return Ok(value);
        }

        self.telemetry.record(&self.name, key, CacheActivity::Miss);
        self.hooks.miss(key);

        let stores = self.stores();
        let reference_args = (stores && self.references.is_some()).then(|| args.clone());

        let started = self.clock.instant();
        let produced = (self.producer)(args, key.to_owned()).await;
        self.telemetry
            .record_produce(&self.name, self.clock.instant().saturating_duration_since(started));

        let value = produced.map_err(|source| Error::producer(&self.name, source))?;

        if stores {
            self.store(&storage_key, key, reference_args, &value).await;
        }
        Ok(value)
    }

    fn stores(&self) -> bool {
        !self.dedupe_only && self.ttl >= MIN_STORED_TTL
    }

    async fn lookup(&self, storage_key: &str, key: &str) -> Option<V> {
        match self.storage.get(storage_key).await {
            Ok(Some(raw)) => match serde_json::from_value(raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    self.storage_failed(key, "decode", &error);
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                self.storage_failed(key, "get", &error);
                None
            }
        }
    }

    async fn store(&self, storage_key: &str, key: &str, reference_args: Option<A>, value: &V) {
        let references = match (&self.references, reference_args) {
            (Some(references), Some(args)) => references(args, key.to_owned(), value.clone()).await,
            _ => Vec::new(),
        };

        let raw = match serde_json::to_value(value) {
            Ok(raw) => raw,
            Err(error) => {
                self.storage_failed(key, "encode", &error);
                return;
            }
        };

        if let Err(error) = self.storage.set(storage_key, raw, self.ttl, &references).await {
            self.storage_failed(key, "set", &error);
        }
    }

    fn storage_failed(&self, key: &str, operation: &'static str, error: &dyn Display) {
        self.telemetry.record_store_error(&self.name, key, operation, error);
    }

    /// Drops the in-flight entry and stored value for `args`, or for every key when `None`.
    ///
    /// Running executions are not cancelled; their callers still receive their outcome.
    pub(crate) async fn clear(&self, args: Option<&A>) -> Result<(), Error> {
        let Some(args) = args else {
            self.clear_all().await;
            return Ok(());
        };

        let key = self.key_of(args)?;
        self.in_flight.lock().remove(&key);

        if !self.dedupe_only
            && let Err(error) = self.storage.remove(&key::storage_key(&self.name, &key)).await
        {
            self.storage_failed(&key, "remove", &error);
        }
        Ok(())
    }

    pub(crate) async fn clear_all(&self) {
        if !self.dedupe_only
            && let Err(error) = self.storage.clear(Some(&key::storage_prefix(&self.name))).await
        {
            self.storage_failed("", "clear", &error);
        }
        self.in_flight.lock().clear();
    }

    pub(crate) async fn invalidate(&self, references: &[String]) -> Vec<String> {
        match self.storage.invalidate(references).await {
            Ok(removed) => removed,
            Err(error) => {
                self.storage_failed("", "invalidate", &error);
                Vec::new()
            }
        }
    }
}

impl<A, V> Engine<A, V> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn storage(&self) -> &DynamicStorage<Value> {
        &self.storage
    }

    fn forget(&self, id: u64, key: &str) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key);
        }
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Forgets the in-flight entry once the execution settles or unwinds.
struct ForgetOnDrop<'a, A, V> {
    engine: &'a Engine<A, V>,
    id: u64,
    key: &'a str,
}

impl<A, V> Drop for ForgetOnDrop<'_, A, V> {
    fn drop(&mut self) {
        self.engine.forget(self.id, self.key);
    }
}

impl<A, V> Debug for Engine<A, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("dedupe_only", &self.dedupe_only)
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

/// An invocable cached function returned by [`Cache::define`](crate::Cache::define).
///
/// Handles are cheap to clone; clones share the same in-flight executions.
pub struct Handle<A, V> {
    engine: Arc<Engine<A, V>>,
}

impl<A, V> Clone for Handle<A, V> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<A, V> Debug for Handle<A, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.engine).finish()
    }
}

impl<A, V> Handle<A, V>
where
    A: Serialize + Clone + Send + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(engine: Arc<Engine<A, V>>) -> Self {
        Self { engine }
    }

    /// Calls the function, sharing the execution with concurrent calls for the same key.
    ///
    /// The call is registered immediately, before the returned future is first polled. The
    /// execution runs on the cache's spawner, inside the span of the call that started it, and
    /// completes even if every caller drops its future.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] if the arguments cannot be serialized, and otherwise the error
    /// shared by every caller of the same execution.
    pub fn call(&self, args: A) -> impl Future<Output = Result<V, Error>> + Send + 'static {
        let outcome = self.engine.invoke(args);
        async move { outcome?.await }
    }

    /// Returns the cache key `args` map to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] if the arguments cannot be serialized.
    pub fn key(&self, args: &A) -> Result<String, Error> {
        self.engine.key_of(args)
    }

    /// Returns the name the function was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Returns the number of executions currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.engine.in_flight_count()
    }

    /// Forgets the value for `args`, or every value of this function when `None`.
    ///
    /// Executions already running are not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] if the arguments cannot be serialized.
    pub async fn clear(&self, args: Option<&A>) -> Result<(), Error> {
        self.engine.clear(args).await
    }

    /// Removes every stored entry tagged with any of `references`, returning the removed
    /// storage keys.
    ///
    /// Storage shared with other functions is invalidated for them as well.
    pub async fn invalidate(&self, references: &[String]) -> Vec<String> {
        self.engine.invalidate(references).await
    }
}

#[cfg(test)]
impl<A, V> Handle<A, V> {
    pub(crate) fn engine(&self) -> &Arc<Engine<A, V>> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use cachedupe_storage::testing::{MockStorage, StorageOp};

    use super::*;

    fn engine(storage: &MockStorage<Value>, ttl: Duration, dedupe_only: bool) -> Arc<Engine<u64, u64>> {
        let config = EngineConfig {
            name: Arc::from("double"),
            serialize: None,
            references: None,
            storage: DynamicStorage::new(storage.clone()),
            ttl,
            dedupe_only,
            hooks: Hooks::default(),
            telemetry: Telemetry::default(),
            clock: Clock::new_frozen(),
            spawner: Spawner::new_tokio(),
        };
        let producer: ProducerFn<u64, u64> = Arc::new(|x: u64, _key: String| {
            async move { Ok::<_, Infallible>(x * 2) }
                .map(|result| result.map_err(Into::<BoxError>::into))
                .boxed()
        });
        Arc::new(Engine::new(config, producer))
    }

    #[test]
    fn one_second_is_the_shortest_stored_ttl() {
        let storage = MockStorage::new();

        assert!(engine(&storage, Duration::from_secs(1), false).stores());
        assert!(!engine(&storage, Duration::from_millis(999), false).stores());
        assert!(!engine(&storage, Duration::from_secs(60), true).stores());
    }

    #[test]
    fn forget_leaves_a_newer_execution_in_place() {
        let engine = engine(&MockStorage::new(), Duration::from_secs(60), false);
        engine.in_flight.lock().insert(
            "1".to_string(),
            InFlight {
                id: 7,
                outcome: futures::future::pending::<Result<u64, Error>>().boxed().shared(),
            },
        );

        engine.forget(6, "1");
        assert_eq!(engine.in_flight_count(), 1);

        engine.forget(7, "1");
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn stored_values_are_namespaced_by_name() {
        let storage = MockStorage::new();
        let engine = engine(&storage, Duration::from_secs(60), false);

        assert_eq!(engine.invoke(21).unwrap().await.unwrap(), 42);

        assert_eq!(
            storage.operations(),
            vec![
                StorageOp::Get("double~21".into()),
                StorageOp::Set {
                    key: "double~21".into(),
                    ttl: Duration::from_secs(60),
                    references: Vec::new(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn clearing_everything_uses_the_name_prefix() {
        let storage = MockStorage::new();
        let engine = engine(&storage, Duration::from_secs(60), false);

        engine.clear(None).await.unwrap();

        assert_eq!(storage.operations(), vec![StorageOp::Clear(Some("double~".into()))]);
    }

    #[test]
    fn debug_output_shows_configuration() {
        let engine = engine(&MockStorage::new(), Duration::from_secs(60), false);
        let debug = format!("{engine:?}");

        assert!(debug.contains("name: \"double\""), "{debug}");
        assert!(debug.contains("in_flight: 0"), "{debug}");
    }
}
