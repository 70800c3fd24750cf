// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities for metric validation.

use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics, ScopeMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

use super::CacheActivity;
use super::attributes::{CACHE_ACTIVITY_NAME, CACHE_NAME};
use super::metrics::{CACHE_EVENT_COUNT_NAME, CACHE_PRODUCE_DURATION_NAME};

/// Collects exported metrics in memory so tests can assert on them.
#[derive(Debug)]
pub(crate) struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricTester {
    #[must_use]
    pub fn new() -> Self {
        let in_memory = InMemoryMetricExporter::default();

        Self {
            exporter: in_memory.clone(),
            provider: SdkMeterProvider::builder().with_periodic_exporter(in_memory).build(),
        }
    }

    #[must_use]
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Returns how many events with `activity` were counted for the function `name`.
    #[must_use]
    pub fn event_count(&self, name: &str, activity: CacheActivity) -> u64 {
        self.latest(CACHE_EVENT_COUNT_NAME, |data| match data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
                .data_points()
                .filter(|point| {
                    has_attribute(point.attributes(), CACHE_NAME, name)
                        && has_attribute(point.attributes(), CACHE_ACTIVITY_NAME, activity.as_str())
                })
                .map(|point| point.value())
                .sum(),
            _ => 0,
        })
    }

    /// Returns how many producer durations were recorded for the function `name`.
    #[must_use]
    pub fn produce_count(&self, name: &str) -> u64 {
        self.latest(CACHE_PRODUCE_DURATION_NAME, |data| match data {
            AggregatedMetrics::F64(MetricData::Histogram(histogram)) => histogram
                .data_points()
                .filter(|point| has_attribute(point.attributes(), CACHE_NAME, name))
                .map(|point| point.count())
                .sum(),
            _ => 0,
        })
    }

    // Exports are cumulative, so the largest reading across flushes is the current one.
    fn latest(&self, metric_name: &str, read: impl Fn(&AggregatedMetrics) -> u64) -> u64 {
        self.provider.force_flush().unwrap();
        self.exporter
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .filter(|metric| metric.name() == metric_name)
            .map(|metric| read(metric.data()))
            .max()
            .unwrap_or_default()
    }
}

fn has_attribute<'a>(mut attributes: impl Iterator<Item = &'a KeyValue>, key: &str, expected: &str) -> bool {
    attributes.any(|kv| kv.key.as_str() == key && matches!(&kv.value, Value::String(s) if s.as_str() == expected))
}
