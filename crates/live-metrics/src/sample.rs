//! Drained form of one collection interval.

use std::sync::atomic::Ordering;

use api_types::MetricPoint;
use api_types::MonitoringDataPoint;
use api_types::TelemetryDocument;
use chrono::DateTime;
use chrono::Utc;

use crate::accumulator::DataAccumulator;

pub const REQUESTS_PER_SECOND: &str = r"\ApplicationInsights\Requests/Sec";
pub const REQUEST_DURATION: &str = r"\ApplicationInsights\Request Duration";
pub const REQUESTS_FAILED_PER_SECOND: &str = r"\ApplicationInsights\Requests Failed/Sec";
pub const REQUESTS_SUCCEEDED_PER_SECOND: &str = r"\ApplicationInsights\Requests Succeeded/Sec";
pub const DEPENDENCY_CALLS_PER_SECOND: &str = r"\ApplicationInsights\Dependency Calls/Sec";
pub const DEPENDENCY_CALL_DURATION: &str = r"\ApplicationInsights\Dependency Call Duration";
pub const DEPENDENCY_CALLS_FAILED_PER_SECOND: &str =
    r"\ApplicationInsights\Dependency Calls Failed/Sec";
pub const DEPENDENCY_CALLS_SUCCEEDED_PER_SECOND: &str =
    r"\ApplicationInsights\Dependency Calls Succeeded/Sec";
pub const EXCEPTIONS_PER_SECOND: &str = r"\ApplicationInsights\Exceptions/Sec";

/// Average of `total_ms` over `count`, with `count` as its weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedAverage {
    pub value: f64,
    pub count: u64,
}

impl WeightedAverage {
    fn of(total_ms: f64, count: u64) -> Self {
        let value = if count == 0 { 0.0 } else { total_ms / count as f64 };
        Self { value, count }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedMetricValue {
    pub id: String,
    pub value: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub requests_per_second: f64,
    pub request_duration: WeightedAverage,
    pub requests_failed_per_second: f64,
    pub requests_succeeded_per_second: f64,
    pub dependency_calls_per_second: f64,
    pub dependency_call_duration: WeightedAverage,
    pub dependency_calls_failed_per_second: f64,
    pub dependency_calls_succeeded_per_second: f64,
    pub exceptions_per_second: f64,
    pub documents: Vec<TelemetryDocument>,
    pub calculated_metrics: Vec<CalculatedMetricValue>,
    pub global_document_quota_reached: bool,
}

impl DataSample {
    /// Drain `accumulator`, closing its interval at `ended_at`.
    pub fn from_accumulator(accumulator: &DataAccumulator, ended_at: DateTime<Utc>) -> Self {
        let started_at = accumulator.started_at();
        let seconds = interval_seconds(started_at, ended_at);
        let rate = |count: u64| count as f64 / seconds;
        let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Acquire);

        let (request_count, request_total) = accumulator.requests.get();
        let (dependency_count, dependency_total) = accumulator.dependencies.get();

        let calculated_metrics = accumulator
            .calculated_metrics()
            .map(|(id, aggregation, values)| {
                let (value, count) = values.aggregate(aggregation);
                CalculatedMetricValue {
                    id: id.to_string(),
                    value,
                    count,
                }
            })
            .collect();

        Self {
            started_at,
            ended_at,
            requests_per_second: rate(request_count),
            request_duration: WeightedAverage::of(
                request_total.as_secs_f64() * 1000.0,
                request_count,
            ),
            requests_failed_per_second: rate(load(&accumulator.requests_failed)),
            requests_succeeded_per_second: rate(load(&accumulator.requests_succeeded)),
            dependency_calls_per_second: rate(dependency_count),
            dependency_call_duration: WeightedAverage::of(
                dependency_total.as_secs_f64() * 1000.0,
                dependency_count,
            ),
            dependency_calls_failed_per_second: rate(load(&accumulator.dependencies_failed)),
            dependency_calls_succeeded_per_second: rate(load(&accumulator.dependencies_succeeded)),
            exceptions_per_second: rate(load(&accumulator.exceptions)),
            documents: accumulator.drain_documents(),
            calculated_metrics,
            global_document_quota_reached: accumulator.global_quota_exhausted(),
        }
    }

    /// Wire form. Identity fields are stamped by the collector client.
    pub fn to_data_point(&self) -> MonitoringDataPoint {
        let mut metrics = vec![
            MetricPoint::new(REQUESTS_PER_SECOND, self.requests_per_second, 1),
            MetricPoint::new(
                REQUEST_DURATION,
                self.request_duration.value,
                self.request_duration.count,
            ),
            MetricPoint::new(REQUESTS_FAILED_PER_SECOND, self.requests_failed_per_second, 1),
            MetricPoint::new(
                REQUESTS_SUCCEEDED_PER_SECOND,
                self.requests_succeeded_per_second,
                1,
            ),
            MetricPoint::new(DEPENDENCY_CALLS_PER_SECOND, self.dependency_calls_per_second, 1),
            MetricPoint::new(
                DEPENDENCY_CALL_DURATION,
                self.dependency_call_duration.value,
                self.dependency_call_duration.count,
            ),
            MetricPoint::new(
                DEPENDENCY_CALLS_FAILED_PER_SECOND,
                self.dependency_calls_failed_per_second,
                1,
            ),
            MetricPoint::new(
                DEPENDENCY_CALLS_SUCCEEDED_PER_SECOND,
                self.dependency_calls_succeeded_per_second,
                1,
            ),
            MetricPoint::new(EXCEPTIONS_PER_SECOND, self.exceptions_per_second, 1),
        ];
        metrics.extend(
            self.calculated_metrics
                .iter()
                .map(|metric| MetricPoint::new(metric.id.clone(), metric.value, metric.count)),
        );

        MonitoringDataPoint {
            timestamp: self.ended_at,
            metrics,
            documents: self.documents.clone(),
            global_document_quota_reached: self.global_document_quota_reached,
            ..Default::default()
        }
    }
}

/// Interval length rounded to whole seconds, at least one.
fn interval_seconds(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> f64 {
    let millis = (ended_at - started_at).num_milliseconds().max(0);
    ((millis as f64 / 1000.0).round()).max(1.0)
}
