//! Hot path telemetry interception.
//!
//! [`LiveMetricsProcessor`] sits in the host's processor chain. Every item is
//! forwarded to the next stage no matter what; while a collection is
//! running the item is also counted, fed to calculated metrics and offered
//! to document streams. Nothing here blocks or fails the producer.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;
use collector_client::DEFAULT_ENDPOINT;
use error_stack::report;
use error_stack::Report;
use error_stack::ResultExt;
use quota::Clock;
use quota::QuotaTracker;
use tracing::trace;
use url::Url;

use crate::accumulator::AccumulatorManager;
use crate::accumulator::DataAccumulator;
use crate::collection_configuration::ConfiguredTelemetry;
use crate::collection_configuration::QuotaSettings;
use crate::error::ProcessorError;
use crate::telemetry::DependencyTelemetry;
use crate::telemetry::Telemetry;

/// One stage of the host's telemetry pipeline.
pub trait TelemetryProcessor: Send + Sync {
    fn process(&self, item: Telemetry);
}

/// Settings of one running collection.
#[derive(Debug)]
struct ActiveCollection {
    accumulators: Arc<AccumulatorManager>,
    instrumentation_key: String,
    disable_full_telemetry_items: bool,
}

/// Collects live metrics from the items flowing through it.
pub struct LiveMetricsProcessor {
    next: Arc<dyn TelemetryProcessor>,
    clock: Arc<dyn Clock>,
    active: ArcSwapOption<ActiveCollection>,
    global_quota: ArcSwap<QuotaTracker>,
    /// Lowercased host of the collector endpoint; calls to it are dropped.
    endpoint_host: ArcSwap<String>,
    /// Serializes start, stop and quota updates.
    control: Mutex<()>,
}

impl std::fmt::Debug for LiveMetricsProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMetricsProcessor")
            .field("collecting", &self.is_collecting())
            .field("endpoint_host", &self.endpoint_host.load())
            .finish_non_exhaustive()
    }
}

impl LiveMetricsProcessor {
    pub fn new(
        next: Arc<dyn TelemetryProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Report<ProcessorError>> {
        let global_quota = QuotaSettings::GLOBAL_DEFAULT
            .tracker(clock.clone(), None)
            .change_context(ProcessorError::InvalidGlobalQuota)?;
        Ok(Self {
            next,
            clock,
            active: ArcSwapOption::empty(),
            global_quota: ArcSwap::from_pointee(global_quota),
            endpoint_host: ArcSwap::from_pointee(default_endpoint_host()),
            control: Mutex::new(()),
        })
    }

    pub fn is_collecting(&self) -> bool {
        self.active.load().is_some()
    }

    /// Start feeding items into `accumulators`.
    pub fn start_collection(
        &self,
        accumulators: Arc<AccumulatorManager>,
        instrumentation_key: &str,
        endpoint: &Url,
        disable_full_telemetry_items: bool,
    ) -> Result<(), Report<ProcessorError>> {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_collecting() {
            return Err(report!(ProcessorError::AlreadyCollecting));
        }

        self.endpoint_host.store(Arc::new(host_of(endpoint)));
        self.active.store(Some(Arc::new(ActiveCollection {
            accumulators,
            instrumentation_key: instrumentation_key.to_string(),
            disable_full_telemetry_items,
        })));
        tracing::info!(%endpoint, "Live metrics collection started");
        Ok(())
    }

    pub fn stop_collection(&self) -> Result<(), Report<ProcessorError>> {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if self.active.swap(None).is_none() {
            return Err(report!(ProcessorError::NotCollecting));
        }

        self.endpoint_host.store(Arc::new(default_endpoint_host()));
        tracing::info!("Live metrics collection stopped");
        Ok(())
    }

    /// Follow a collector redirect. Only affects a running collection.
    pub fn update_endpoint(&self, endpoint: &Url) {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_collecting() {
            self.endpoint_host.store(Arc::new(host_of(endpoint)));
        }
    }

    /// Replace the global document quota, keeping what is left of the old one.
    pub fn update_global_quota(&self, settings: QuotaSettings) -> Result<(), Report<ProcessorError>> {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = self.global_quota.load().current_quota();
        let tracker = settings
            .tracker(self.clock.clone(), Some(remaining))
            .change_context(ProcessorError::InvalidGlobalQuota)?;
        self.global_quota.store(Arc::new(tracker));
        Ok(())
    }

    fn is_own_traffic(&self, dependency: &DependencyTelemetry) -> bool {
        let host = self.endpoint_host.load();
        if host.is_empty() {
            return false;
        }
        [dependency.target.as_deref(), Some(dependency.name.as_str())]
            .into_iter()
            .flatten()
            .any(|value| value.to_lowercase().contains(host.as_str()))
    }

    fn collect(&self, active: &ActiveCollection, item: &Telemetry) {
        let accumulator = active.accumulators.current();
        let documents = !active.disable_full_telemetry_items;
        match item {
            Telemetry::Request(request) => {
                accumulator.record_request(request.duration, request.reported_success());
                self.collect_typed(&accumulator, request, documents);
            }
            Telemetry::Dependency(dependency) => {
                accumulator.record_dependency(dependency.duration, dependency.success);
                self.collect_typed(&accumulator, dependency, documents);
            }
            Telemetry::Exception(exception) => {
                accumulator.record_exception();
                self.collect_typed(&accumulator, exception, documents);
            }
            Telemetry::Event(event) => self.collect_typed(&accumulator, event, documents),
            Telemetry::Trace(trace) => self.collect_typed(&accumulator, trace, documents),
            Telemetry::Metric(_) => {}
        }
    }

    fn collect_typed<T: ConfiguredTelemetry>(
        &self,
        accumulator: &DataAccumulator,
        item: &T,
        documents: bool,
    ) {
        let configuration = accumulator.configuration();

        for metric in T::metrics(configuration) {
            if !metric.matches(item) {
                continue;
            }
            let (Some(value), Some(values)) =
                (metric.project(item), accumulator.metric_values(metric.index()))
            else {
                continue;
            };
            values.add(value);
        }

        if !documents {
            return;
        }

        let matched: Vec<_> = configuration
            .document_streams()
            .iter()
            .filter(|stream| stream.matches(item))
            .collect();
        if matched.is_empty() {
            return;
        }

        if !self.global_quota.load().apply_quota() {
            trace!("Global document quota exhausted");
            accumulator.set_global_quota_exhausted();
            return;
        }

        // every matching stream pays, even when another already admitted the item
        let admitted: Vec<String> = matched
            .into_iter()
            .filter(|stream| stream.quota().apply_quota())
            .map(|stream| stream.id().to_string())
            .collect();
        if admitted.is_empty() {
            trace!(telemetry_type = %T::TELEMETRY_TYPE, "Document dropped by stream quotas");
            return;
        }

        let mut document = item.to_document();
        document.document_stream_ids = admitted;
        accumulator.push_document(document);
    }
}

impl TelemetryProcessor for LiveMetricsProcessor {
    fn process(&self, item: Telemetry) {
        if let Telemetry::Dependency(dependency) = &item {
            if self.is_own_traffic(dependency) {
                trace!(name = %dependency.name, "Dropping call to the live metrics collector");
                return;
            }
        }

        if let Some(active) = self.active.load_full() {
            let belongs = match item.context().instrumentation_key.as_deref() {
                Some(key) => key.eq_ignore_ascii_case(&active.instrumentation_key),
                None => true,
            };
            if belongs {
                self.collect(&active, &item);
            }
        }

        self.next.process(item);
    }
}

fn host_of(endpoint: &Url) -> String {
    endpoint.host_str().unwrap_or_default().to_lowercase()
}

fn default_endpoint_host() -> String {
    Url::parse(DEFAULT_ENDPOINT)
        .map(|url| host_of(&url))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use api_types::AggregationType;
    use api_types::CalculatedMetricInfo;
    use api_types::CollectionConfigurationInfo;
    use api_types::DocumentDetails;
    use api_types::DocumentFilterConjunctionGroupInfo;
    use api_types::DocumentStreamInfo;
    use api_types::FilterConjunctionGroupInfo;
    use api_types::FilterInfo;
    use api_types::Predicate;
    use api_types::QuotaConfigurationInfo;
    use api_types::TelemetryType;
    use chrono::Utc;
    use quota::ManualClock;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::collection_configuration::CollectionConfiguration;
    use crate::telemetry::RequestTelemetry;
    use crate::telemetry::TelemetryContext;

    #[derive(Debug, Default)]
    struct Sink {
        items: Mutex<Vec<Telemetry>>,
    }

    impl TelemetryProcessor for Sink {
        fn process(&self, item: Telemetry) {
            self.items.lock().unwrap().push(item);
        }
    }

    fn stream(id: &str, filters: Vec<FilterInfo>) -> DocumentStreamInfo {
        DocumentStreamInfo {
            id: id.to_string(),
            document_filter_groups: vec![DocumentFilterConjunctionGroupInfo {
                telemetry_type: TelemetryType::Request,
                filters: FilterConjunctionGroupInfo { filters },
            }],
        }
    }

    fn request(index: usize, success: bool) -> Telemetry {
        Telemetry::Request(RequestTelemetry {
            id: index.to_string(),
            name: format!("request {index}"),
            response_code: if success { "200" } else { "500" }.to_string(),
            success: Some(success),
            duration: Duration::from_millis(10),
            ..Default::default()
        })
    }

    struct Fixture {
        clock: ManualClock,
        sink: Arc<Sink>,
        processor: LiveMetricsProcessor,
        accumulators: Arc<AccumulatorManager>,
    }

    fn fixture(info: &CollectionConfigurationInfo) -> Fixture {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let (configuration, errors) = CollectionConfiguration::compile(info, shared.clone(), None);
        assert!(errors.is_empty());
        let configuration = Arc::new(configuration);

        let sink = Arc::new(Sink::default());
        let processor = LiveMetricsProcessor::new(sink.clone(), shared).unwrap();
        processor
            .update_global_quota(configuration.global_quota())
            .unwrap();
        let accumulators = Arc::new(AccumulatorManager::new(configuration, Utc::now()));
        let endpoint = Url::parse(DEFAULT_ENDPOINT).unwrap();
        processor
            .start_collection(accumulators.clone(), "ikey", &endpoint, false)
            .unwrap();

        Fixture {
            clock,
            sink,
            processor,
            accumulators,
        }
    }

    /// Request names captured per stream.
    fn captured_by_stream(accumulators: &AccumulatorManager) -> BTreeMap<String, Vec<String>> {
        let mut by_stream: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for document in accumulators.current().drain_documents() {
            let DocumentDetails::Request { name, .. } = &document.details else {
                panic!("unexpected document {document:?}");
            };
            for stream_id in &document.document_stream_ids {
                by_stream
                    .entry(stream_id.clone())
                    .or_default()
                    .push(name.clone());
            }
        }
        by_stream
    }

    fn names(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|index| format!("request {index}")).collect()
    }

    #[test]
    fn stream_quotas_are_independent() {
        let info = CollectionConfigurationInfo {
            etag: "v1".to_string(),
            document_streams: vec![
                stream("all", Vec::new()),
                stream(
                    "successful",
                    vec![FilterInfo::new("Success", Predicate::Equal, "true")],
                ),
            ],
            ..Default::default()
        };
        let fixture = fixture(&info);

        for index in 0..100 {
            fixture.processor.process(request(index, index == 0));
        }
        let first = captured_by_stream(&fixture.accumulators);
        assert_eq!(first["all"], names(0..3));
        assert_eq!(first["successful"], names(0..1));

        fixture.clock.advance(Duration::from_secs(30));
        for index in 0..100 {
            fixture.processor.process(request(index, index < 20));
        }
        let second = captured_by_stream(&fixture.accumulators);
        assert_eq!(second["all"], names(0..15));
        assert_eq!(second["successful"], names(0..17));

        assert_eq!(fixture.sink.items.lock().unwrap().len(), 200);
    }

    #[test]
    fn global_quota_caps_all_streams() {
        let info = CollectionConfigurationInfo {
            etag: "v1".to_string(),
            document_streams: (0..15).map(|i| stream(&format!("s{i}"), Vec::new())).collect(),
            quota_info: Some(QuotaConfigurationInfo {
                initial_quota: Some(1000.0),
                max_quota: 1000.0,
                quota_accrual_rate_per_sec: None,
            }),
            global_quota_info: Some(QuotaConfigurationInfo {
                initial_quota: None,
                max_quota: 6.0,
                quota_accrual_rate_per_sec: Some(0.1),
            }),
            ..Default::default()
        };
        let fixture = fixture(&info);

        for index in 0..10 {
            fixture.processor.process(request(index, true));
        }

        let accumulator = fixture.accumulators.current();
        assert!(accumulator.global_quota_exhausted());
        let documents = accumulator.drain_documents();
        assert_eq!(documents.len(), 6);
        assert!(documents
            .iter()
            .all(|document| document.document_stream_ids.len() == 15));
    }

    #[test]
    fn counters_and_metrics_without_documents() {
        let info = CollectionConfigurationInfo {
            etag: "v1".to_string(),
            metrics: vec![CalculatedMetricInfo {
                id: "slow".to_string(),
                telemetry_type: TelemetryType::Request,
                filter_groups: Vec::new(),
                projection: "Duration".to_string(),
                aggregation: AggregationType::Max,
            }],
            document_streams: vec![stream("all", Vec::new())],
            ..Default::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let (configuration, _) = CollectionConfiguration::compile(&info, clock.clone(), None);
        let accumulators = Arc::new(AccumulatorManager::new(Arc::new(configuration), Utc::now()));
        let processor = LiveMetricsProcessor::new(Arc::new(Sink::default()), clock).unwrap();
        processor
            .start_collection(
                accumulators.clone(),
                "ikey",
                &Url::parse(DEFAULT_ENDPOINT).unwrap(),
                true,
            )
            .unwrap();

        processor.process(request(0, true));
        processor.process(request(1, false));

        let accumulator = accumulators.current();
        assert_eq!(accumulator.requests.get().0, 2);
        assert_eq!(accumulator.requests_failed.load(std::sync::atomic::Ordering::Acquire), 1);
        assert_eq!(
            accumulator.metric_values(0).unwrap().aggregate(AggregationType::Max),
            (10.0, 2)
        );
        assert!(accumulator.drain_documents().is_empty());
    }

    #[test]
    fn concurrent_producers_converge_to_exact_totals() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let info = CollectionConfigurationInfo {
            etag: "v1".to_string(),
            metrics: vec![CalculatedMetricInfo {
                id: "total-duration".to_string(),
                telemetry_type: TelemetryType::Request,
                filter_groups: Vec::new(),
                projection: "Duration".to_string(),
                aggregation: AggregationType::Sum,
            }],
            document_streams: vec![stream("all", Vec::new())],
            quota_info: Some(QuotaConfigurationInfo {
                initial_quota: Some(50.0),
                max_quota: 50.0,
                quota_accrual_rate_per_sec: None,
            }),
            ..Default::default()
        };
        let fixture = fixture(&info);

        std::thread::scope(|scope| {
            for thread in 0..THREADS {
                let processor = &fixture.processor;
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        let index = thread * PER_THREAD + i;
                        processor.process(request(index, index % 4 != 0));
                    }
                });
            }
        });

        let total = THREADS * PER_THREAD;
        let accumulator = fixture.accumulators.current();
        assert_eq!(accumulator.requests.get().0 as usize, total);
        assert_eq!(
            accumulator.requests_failed.load(std::sync::atomic::Ordering::Acquire) as usize,
            total / 4
        );
        assert_eq!(
            accumulator.metric_values(0).unwrap().aggregate(AggregationType::Sum),
            (10.0 * total as f64, total as u64)
        );
        let documents = accumulator.drain_documents();
        assert_eq!(documents.len(), 50);
        assert!(!accumulator.global_quota_exhausted());
        assert_eq!(fixture.sink.items.lock().unwrap().len(), total);
    }

    #[test]
    fn foreign_instrumentation_key_is_forwarded_only() {
        let fixture = fixture(&CollectionConfigurationInfo::default());

        let mut foreign = RequestTelemetry::default();
        foreign.context = TelemetryContext {
            instrumentation_key: Some("other".to_string()),
            ..Default::default()
        };
        let mut own = RequestTelemetry::default();
        own.context.instrumentation_key = Some("IKEY".to_string());

        fixture.processor.process(foreign.into());
        fixture.processor.process(own.into());
        fixture.processor.process(RequestTelemetry::default().into());

        assert_eq!(fixture.accumulators.current().requests.get().0, 2);
        assert_eq!(fixture.sink.items.lock().unwrap().len(), 3);
    }

    #[test]
    fn collector_traffic_is_dropped() {
        let sink = Arc::new(Sink::default());
        let processor =
            LiveMetricsProcessor::new(sink.clone(), Arc::new(ManualClock::default())).unwrap();

        let to_collector = DependencyTelemetry {
            name: "POST /QuickPulseService.svc/ping".to_string(),
            target: Some("RT.Services.VisualStudio.com".to_string()),
            ..Default::default()
        };
        let elsewhere = DependencyTelemetry {
            name: "GET /orders".to_string(),
            target: Some("db.internal".to_string()),
            ..Default::default()
        };

        processor.process(to_collector.clone().into());
        processor.process(elsewhere.into());
        assert_eq!(sink.items.lock().unwrap().len(), 1);

        // while collecting, the live endpoint is filtered instead
        let accumulators = Arc::new(AccumulatorManager::new(
            Arc::new(CollectionConfiguration::empty()),
            Utc::now(),
        ));
        let redirected = Url::parse("https://westus.live.example.com/QuickPulseService.svc").unwrap();
        processor
            .start_collection(accumulators, "ikey", &redirected, false)
            .unwrap();
        processor.process(to_collector.into());
        processor.process(
            DependencyTelemetry {
                target: Some("westus.live.example.com".to_string()),
                ..Default::default()
            }
            .into(),
        );
        assert_eq!(sink.items.lock().unwrap().len(), 2);
    }

    #[test]
    fn lifecycle_contract_is_enforced() {
        let processor = LiveMetricsProcessor::new(
            Arc::new(Sink::default()),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        let accumulators = Arc::new(AccumulatorManager::new(
            Arc::new(CollectionConfiguration::empty()),
            Utc::now(),
        ));
        let endpoint = Url::parse(DEFAULT_ENDPOINT).unwrap();

        let err = processor.stop_collection().unwrap_err();
        assert!(matches!(err.current_context(), ProcessorError::NotCollecting));

        processor
            .start_collection(accumulators.clone(), "ikey", &endpoint, false)
            .unwrap();
        let err = processor
            .start_collection(accumulators, "ikey", &endpoint, false)
            .unwrap_err();
        assert!(matches!(err.current_context(), ProcessorError::AlreadyCollecting));

        processor.stop_collection().unwrap();
        assert!(!processor.is_collecting());
    }
}
