// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and optional OpenTelemetry metrics for cached functions.

use std::fmt::Display;
use std::time::Duration;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, MeterProvider},
};

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Dedupe,
    Error,
    StoreError,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Dedupe => "cache.dedupe",
            Self::Error => "cache.error",
            Self::StoreError => "cache.store_error",
        }
    }
}

/// Records cached-function activity as tracing events and, when a meter is configured,
/// as OpenTelemetry metrics.
#[derive(Clone, Debug, Default)]
pub(crate) struct Telemetry {
    #[cfg(any(feature = "metrics", test))]
    instruments: Option<Instruments>,
}

#[cfg(any(feature = "metrics", test))]
#[derive(Clone, Debug)]
struct Instruments {
    event_counter: Counter<u64>,
    produce_duration: Histogram<f64>,
}

impl Telemetry {
    #[cfg(any(feature = "metrics", test))]
    pub fn with_meter_provider(provider: &dyn MeterProvider) -> Self {
        let meter = metrics::create_meter(provider);
        Self {
            instruments: Some(Instruments {
                event_counter: metrics::create_event_counter(&meter),
                produce_duration: metrics::create_produce_duration_histogram(&meter),
            }),
        }
    }

    pub fn record(&self, name: &str, key: &str, activity: CacheActivity) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.instruments {
            instruments.event_counter.add(1, &Self::attributes(name, activity));
        }

        Self::emit(name, key, activity);
    }

    /// Records a storage failure that was swallowed instead of failing the call.
    pub fn record_store_error(&self, name: &str, key: &str, operation: &'static str, error: &dyn Display) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.instruments {
            instruments
                .event_counter
                .add(1, &Self::attributes(name, CacheActivity::StoreError));
        }

        tracing::warn!(
            cache.name = name,
            cache.key = key,
            cache.activity = CacheActivity::StoreError.as_str(),
            storage.operation = operation,
            error = %error,
            "cache.event"
        );
    }

    #[cfg_attr(not(any(feature = "metrics", test)), expect(unused_variables, reason = "only recorded as a metric"))]
    pub fn record_produce(&self, name: &str, duration: Duration) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.instruments {
            instruments
                .produce_duration
                .record(duration.as_secs_f64(), &[KeyValue::new(attributes::CACHE_NAME, name.to_owned())]);
        }
    }

    #[cfg(any(feature = "metrics", test))]
    fn attributes(name: &str, activity: CacheActivity) -> [KeyValue; 2] {
        [
            KeyValue::new(attributes::CACHE_NAME, name.to_owned()),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
        ]
    }

    fn emit(name: &str, key: &str, activity: CacheActivity) {
        let activity_name = activity.as_str();

        // Tracing level must be constant, so we use a macro to select the appropriate level.
        // Field names must match constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(cache.name = name, cache.key = key, cache.activity = activity_name, "cache.event")
            };
        }

        match activity {
            CacheActivity::StoreError => emit_event!(warn),
            CacheActivity::Error => emit_event!(info),
            CacheActivity::Hit | CacheActivity::Miss | CacheActivity::Dedupe => emit_event!(debug),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::testing::MetricTester;
    use super::*;

    #[test]
    fn activity_as_str() {
        assert_eq!(CacheActivity::Hit.as_str(), "cache.hit");
        assert_eq!(CacheActivity::Miss.as_str(), "cache.miss");
        assert_eq!(CacheActivity::Dedupe.as_str(), "cache.dedupe");
        assert_eq!(CacheActivity::Error.as_str(), "cache.error");
        assert_eq!(CacheActivity::StoreError.as_str(), "cache.store_error");
    }

    #[test]
    #[traced_test]
    fn emit_contains_all_fields_and_values() {
        Telemetry::default().record("fetch", "42", CacheActivity::Miss);

        assert!(logs_contain(attributes::CACHE_EVENT_NAME));
        assert!(logs_contain(attributes::CACHE_NAME));
        assert!(logs_contain(attributes::CACHE_KEY));
        assert!(logs_contain(attributes::CACHE_ACTIVITY_NAME));
        assert!(logs_contain("fetch"));
        assert!(logs_contain("cache.miss"));
    }

    #[test]
    #[traced_test]
    fn activities_are_logged_at_their_level() {
        let telemetry = Telemetry::default();
        telemetry.record("fetch", "1", CacheActivity::StoreError);
        telemetry.record("fetch", "2", CacheActivity::Error);
        telemetry.record("fetch", "3", CacheActivity::Dedupe);

        assert!(logs_contain("WARN"));
        assert!(logs_contain("INFO"));
        assert!(logs_contain("DEBUG"));
    }

    #[test]
    #[traced_test]
    fn store_errors_carry_operation_and_cause() {
        let tester = MetricTester::new();
        let telemetry = Telemetry::with_meter_provider(tester.meter_provider());

        telemetry.record_store_error("fetch", "42", "set", &"disk full");

        assert!(logs_contain("WARN"));
        assert!(logs_contain("storage.operation=\"set\""));
        assert!(logs_contain("disk full"));
        assert_eq!(tester.event_count("fetch", CacheActivity::StoreError), 1);
    }

    #[test]
    fn metrics_carry_name_and_activity() {
        let tester = MetricTester::new();
        let telemetry = Telemetry::with_meter_provider(tester.meter_provider());

        telemetry.record("fetch", "1", CacheActivity::Hit);
        telemetry.record("fetch", "2", CacheActivity::Hit);
        telemetry.record("fetch", "3", CacheActivity::Miss);

        assert_eq!(tester.event_count("fetch", CacheActivity::Hit), 2);
        assert_eq!(tester.event_count("fetch", CacheActivity::Miss), 1);
        assert_eq!(tester.event_count("other", CacheActivity::Hit), 0);
    }

    #[test]
    fn produce_duration_is_recorded() {
        let tester = MetricTester::new();
        let telemetry = Telemetry::with_meter_provider(tester.meter_provider());

        telemetry.record_produce("fetch", Duration::from_millis(5));

        assert_eq!(tester.produce_count("fetch"), 1);
    }

    #[test]
    fn disabled_telemetry_records_nothing() {
        let telemetry = Telemetry::default();
        telemetry.record_produce("fetch", Duration::from_secs(1));
        assert!(telemetry.instruments.is_none());
    }
}
