//! User defined aggregations over filtered telemetry.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use api_types::AggregationType;
use api_types::CalculatedMetricInfo;
use error_stack::report;
use error_stack::Report;

use crate::error::ConfigurationError;
use crate::filter::FieldRef;
use crate::filter::FilterConjunctionGroup;
use crate::filter::FilterFailure;
use crate::filter::FilterableTelemetry;

const COUNT_PROJECTION: &str = "Count()";

#[derive(Debug, Clone)]
enum Projection<F> {
    Count,
    Field(FieldRef<F>),
}

/// A compiled calculated metric.
#[derive(Debug, Clone)]
pub struct CalculatedMetric<T: FilterableTelemetry> {
    id: String,
    /// Slot of this metric's values in a `DataAccumulator`.
    index: usize,
    aggregation: AggregationType,
    projection: Projection<T::Field>,
    groups: Vec<FilterConjunctionGroup<T>>,
}

impl<T: FilterableTelemetry> CalculatedMetric<T> {
    /// Compile `info`. Filter failures disable the affected group only; an
    /// unusable projection rejects the whole metric.
    pub fn compile(
        info: &CalculatedMetricInfo,
        index: usize,
    ) -> (Result<Self, Report<ConfigurationError>>, Vec<FilterFailure>) {
        let mut failures = Vec::new();
        let groups = info
            .filter_groups
            .iter()
            .map(|group_info| {
                let (group, group_failures) = FilterConjunctionGroup::compile(group_info);
                failures.extend(group_failures);
                group
            })
            .collect();

        let projection = match resolve_projection::<T>(&info.projection) {
            Some(projection) => projection,
            None => {
                let report = report!(ConfigurationError::InvalidProjection {
                    projection: info.projection.clone(),
                    telemetry_type: T::TELEMETRY_TYPE,
                });
                return (Err(report), failures);
            }
        };

        let metric = Self {
            id: info.id.clone(),
            index,
            aggregation: info.aggregation,
            projection,
            groups,
        };
        (Ok(metric), failures)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn aggregation(&self) -> AggregationType {
        self.aggregation
    }

    /// An empty group list matches every item.
    pub fn matches(&self, item: &T) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|group| group.matches(item))
    }

    /// Value `item` contributes, `None` when the projected field is not numeric.
    pub fn project(&self, item: &T) -> Option<f64> {
        match &self.projection {
            Projection::Count => Some(1.0),
            Projection::Field(field) => field.value(item)?.as_number(),
        }
    }
}

fn resolve_projection<T: FilterableTelemetry>(projection: &str) -> Option<Projection<T::Field>> {
    let projection = projection.trim();
    if projection.eq_ignore_ascii_case(COUNT_PROJECTION) {
        return Some(Projection::Count);
    }
    match FieldRef::resolve::<T>(projection)? {
        FieldRef::AnyField => None,
        field => Some(Projection::Field(field)),
    }
}

/// Running count, sum, min and max of one calculated metric.
///
/// The float aggregates live in `AtomicU64` as raw bits and are updated with
/// CAS loops, so producers never block each other.
#[derive(Debug)]
pub struct AccumulatedValues {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for AccumulatedValues {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0f64.to_bits()),
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }
}

impl AccumulatedValues {
    pub fn add(&self, value: f64) {
        update_f64(&self.sum, |sum| sum + value);
        update_f64(&self.min, |min| min.min(value));
        update_f64(&self.max, |max| max.max(value));
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Aggregated value and the number of observations behind it. An empty
    /// metric reports `0`.
    pub fn aggregate(&self, aggregation: AggregationType) -> (f64, u64) {
        let count = self.count();
        if count == 0 {
            return (0.0, 0);
        }
        let load = |cell: &AtomicU64| f64::from_bits(cell.load(Ordering::Acquire));
        let value = match aggregation {
            AggregationType::Sum => load(&self.sum),
            AggregationType::Avg => load(&self.sum) / count as f64,
            AggregationType::Min => load(&self.min),
            AggregationType::Max => load(&self.max),
        };
        (value, count)
    }
}

fn update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
    // the closure never returns None
    let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
        Some(f(f64::from_bits(bits)).to_bits())
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use api_types::FilterConjunctionGroupInfo;
    use api_types::FilterInfo;
    use api_types::Predicate;
    use api_types::TelemetryType;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::telemetry::RequestTelemetry;

    fn info(projection: &str, aggregation: AggregationType) -> CalculatedMetricInfo {
        CalculatedMetricInfo {
            id: "m".to_string(),
            telemetry_type: TelemetryType::Request,
            filter_groups: vec![FilterConjunctionGroupInfo {
                filters: vec![FilterInfo::new("Name", Predicate::Contains, "orders")],
            }],
            projection: projection.to_string(),
            aggregation,
        }
    }

    fn request(name: &str, millis: u64) -> RequestTelemetry {
        RequestTelemetry {
            name: name.to_string(),
            duration: Duration::from_millis(millis),
            ..Default::default()
        }
    }

    #[test]
    fn duration_projection_in_milliseconds() {
        let (metric, failures) =
            CalculatedMetric::<RequestTelemetry>::compile(&info("Duration", AggregationType::Avg), 0);
        let metric = metric.unwrap();
        assert!(failures.is_empty());

        let values = AccumulatedValues::default();
        for item in [request("orders", 100), request("orders", 300), request("cart", 900)] {
            if metric.matches(&item) {
                values.add(metric.project(&item).unwrap());
            }
        }

        assert_eq!(values.aggregate(AggregationType::Avg), (200.0, 2));
        assert_eq!(values.aggregate(AggregationType::Max), (300.0, 2));
        assert_eq!(values.aggregate(AggregationType::Min), (100.0, 2));
    }

    #[test]
    fn count_projection_and_non_numeric_fields() {
        let (count, _) =
            CalculatedMetric::<RequestTelemetry>::compile(&info("count()", AggregationType::Sum), 0);
        assert_eq!(count.unwrap().project(&request("orders", 1)), Some(1.0));

        let (name, _) =
            CalculatedMetric::<RequestTelemetry>::compile(&info("Name", AggregationType::Sum), 0);
        assert_eq!(name.unwrap().project(&request("orders", 1)), None);

        let (bad, _) =
            CalculatedMetric::<RequestTelemetry>::compile(&info("Target", AggregationType::Sum), 0);
        assert!(matches!(
            bad.unwrap_err().current_context(),
            ConfigurationError::InvalidProjection { .. }
        ));
    }

    #[test]
    fn empty_metric_reports_zero() {
        let values = AccumulatedValues::default();
        assert_eq!(values.aggregate(AggregationType::Min), (0.0, 0));
    }

    #[test]
    fn concurrent_adds_are_exact() {
        let values = Arc::new(AccumulatedValues::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let values = Arc::clone(&values);
                thread::spawn(move || {
                    for i in 0..1000 {
                        values.add(f64::from(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        let (sum, count) = values.aggregate(AggregationType::Sum);
        assert_eq!(count, 8000);
        assert_eq!(sum, (0..8000).map(f64::from).sum::<f64>());
        assert_eq!(values.aggregate(AggregationType::Max).0, 7999.0);
        assert_eq!(values.aggregate(AggregationType::Min).0, 0.0);
    }
}
