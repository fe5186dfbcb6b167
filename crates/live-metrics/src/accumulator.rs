//! Per collection interval working set.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use api_types::TelemetryDocument;
use arc_swap::ArcSwap;
use chrono::DateTime;
use chrono::Utc;
use crossbeam_queue::SegQueue;

use crate::calculated_metric::AccumulatedValues;
use crate::collection_configuration::CollectionConfiguration;

const DURATION_BITS: u32 = 44;
const DURATION_MASK: u64 = (1 << DURATION_BITS) - 1;

/// How long a swap waits for producers still holding the previous accumulator.
const RELEASE_TIMEOUT: Duration = Duration::from_millis(50);

/// Count and total duration packed into one word so both are updated by a
/// single atomic add: count in the upper 20 bits, microseconds below.
#[derive(Debug, Default)]
pub struct CountAndDuration(AtomicU64);

impl CountAndDuration {
    pub fn add(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .min(DURATION_MASK);
        self.0.fetch_add((1 << DURATION_BITS) + micros, Ordering::AcqRel);
    }

    /// `(count, total duration)`.
    pub fn get(&self) -> (u64, Duration) {
        let packed = self.0.load(Ordering::Acquire);
        (
            packed >> DURATION_BITS,
            Duration::from_micros(packed & DURATION_MASK),
        )
    }
}

/// Everything collected during one interval.
#[derive(Debug)]
pub struct DataAccumulator {
    configuration: Arc<CollectionConfiguration>,
    started_at: DateTime<Utc>,
    pub requests: CountAndDuration,
    pub requests_succeeded: AtomicU64,
    pub requests_failed: AtomicU64,
    pub dependencies: CountAndDuration,
    pub dependencies_succeeded: AtomicU64,
    pub dependencies_failed: AtomicU64,
    pub exceptions: AtomicU64,
    global_quota_exhausted: AtomicBool,
    documents: SegQueue<TelemetryDocument>,
    /// Indexed like [`CollectionConfiguration::metric_ids`].
    metric_values: Vec<AccumulatedValues>,
}

impl DataAccumulator {
    pub fn new(configuration: Arc<CollectionConfiguration>, started_at: DateTime<Utc>) -> Self {
        let metric_values = configuration
            .metric_ids()
            .iter()
            .map(|_| AccumulatedValues::default())
            .collect();
        Self {
            configuration,
            started_at,
            requests: CountAndDuration::default(),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            dependencies: CountAndDuration::default(),
            dependencies_succeeded: AtomicU64::new(0),
            dependencies_failed: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            global_quota_exhausted: AtomicBool::new(false),
            documents: SegQueue::new(),
            metric_values,
        }
    }

    pub fn configuration(&self) -> &Arc<CollectionConfiguration> {
        &self.configuration
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record_request(&self, duration: Duration, success: bool) {
        self.requests.add(duration);
        if success {
            self.requests_succeeded.fetch_add(1, Ordering::AcqRel);
        } else {
            self.requests_failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn record_dependency(&self, duration: Duration, success: bool) {
        self.dependencies.add(duration);
        if success {
            self.dependencies_succeeded.fetch_add(1, Ordering::AcqRel);
        } else {
            self.dependencies_failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::AcqRel);
    }

    pub fn metric_values(&self, index: usize) -> Option<&AccumulatedValues> {
        self.metric_values.get(index)
    }

    /// Values of every calculated metric, with its id and aggregation.
    pub fn calculated_metrics(
        &self,
    ) -> impl Iterator<Item = (&str, api_types::AggregationType, &AccumulatedValues)> {
        self.configuration
            .metric_ids()
            .iter()
            .zip(&self.metric_values)
            .map(|((id, aggregation), values)| (id.as_str(), *aggregation, values))
    }

    pub fn push_document(&self, document: TelemetryDocument) {
        self.documents.push(document);
    }

    /// Take every captured document, oldest first.
    pub fn drain_documents(&self) -> Vec<TelemetryDocument> {
        std::iter::from_fn(|| self.documents.pop()).collect()
    }

    pub fn set_global_quota_exhausted(&self) {
        self.global_quota_exhausted.store(true, Ordering::Release);
    }

    pub fn global_quota_exhausted(&self) -> bool {
        self.global_quota_exhausted.load(Ordering::Acquire)
    }
}

/// Holds the current accumulator and swaps it at the end of each interval.
#[derive(Debug)]
pub struct AccumulatorManager {
    current: ArcSwap<DataAccumulator>,
}

impl AccumulatorManager {
    pub fn new(configuration: Arc<CollectionConfiguration>, now: DateTime<Utc>) -> Self {
        Self {
            current: ArcSwap::from_pointee(DataAccumulator::new(configuration, now)),
        }
    }

    /// Accumulator producers write to. Keep the returned handle only for the
    /// duration of one item.
    pub fn current(&self) -> Arc<DataAccumulator> {
        self.current.load_full()
    }

    /// Install a fresh accumulator for `configuration` and return the
    /// previous one.
    ///
    /// Waits, bounded, until producers that loaded the previous accumulator
    /// before the swap have released it.
    pub fn complete_current(
        &self,
        configuration: Arc<CollectionConfiguration>,
        now: DateTime<Utc>,
    ) -> Arc<DataAccumulator> {
        let previous = self
            .current
            .swap(Arc::new(DataAccumulator::new(configuration, now)));

        let deadline = Instant::now() + RELEASE_TIMEOUT;
        while Arc::strong_count(&previous) > 1 {
            if Instant::now() >= deadline {
                tracing::debug!(
                    holders = Arc::strong_count(&previous) - 1,
                    "Producers still hold the previous accumulator, draining anyway"
                );
                break;
            }
            std::thread::yield_now();
        }
        previous
    }
}
