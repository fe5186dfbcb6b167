//! Compiled collection configuration.
//!
//! The collector describes what to collect as a [`CollectionConfigurationInfo`].
//! Compilation is best effort: every metric, stream and filter that fails to
//! compile is reported as a [`CollectionConfigurationError`] and skipped, the
//! rest of the configuration still applies.

use std::collections::HashSet;
use std::sync::Arc;

use api_types::AggregationType;
use api_types::CalculatedMetricInfo;
use api_types::CollectionConfigurationError;
use api_types::CollectionConfigurationErrorType;
use api_types::CollectionConfigurationInfo;
use api_types::QuotaConfigurationInfo;
use api_types::TelemetryType;
use error_stack::report;
use error_stack::Context;
use error_stack::Report;
use quota::Clock;
use quota::QuotaError;
use quota::QuotaTracker;
use serde::Deserialize;
use serde::Serialize;

use crate::calculated_metric::CalculatedMetric;
use crate::document::IntoDocument;
use crate::document_stream::DocumentStream;
use crate::error::ConfigurationError;
use crate::filter::FilterConjunctionGroup;
use crate::filter::FilterFailure;
use crate::filter::FilterableTelemetry;
use crate::telemetry::DependencyTelemetry;
use crate::telemetry::EventTelemetry;
use crate::telemetry::ExceptionTelemetry;
use crate::telemetry::RequestTelemetry;
use crate::telemetry::TraceTelemetry;

const ETAG: &str = "ETag";
const METRIC_ID: &str = "MetricId";
const STREAM_ID: &str = "DocumentStreamId";

/// Token bucket parameters resolved against defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaSettings {
    pub initial_quota: f64,
    pub max_quota: f64,
    pub accrual_rate_per_sec: f64,
}

impl QuotaSettings {
    /// Per document stream quota when the collector sends none.
    pub const STREAM_DEFAULT: QuotaSettings = QuotaSettings {
        initial_quota: 3.0,
        max_quota: 30.0,
        accrual_rate_per_sec: 0.5,
    };

    /// Quota shared by all streams when the collector sends none.
    pub const GLOBAL_DEFAULT: QuotaSettings = QuotaSettings {
        initial_quota: 240.0,
        max_quota: 240.0,
        accrual_rate_per_sec: 4.0,
    };

    /// Overlay `info` on `default`. The accrual rate defaults to refilling
    /// `max_quota` in one minute.
    pub fn resolve(info: Option<&QuotaConfigurationInfo>, default: QuotaSettings) -> Self {
        let Some(info) = info else {
            return default;
        };
        Self {
            initial_quota: info
                .initial_quota
                .unwrap_or(default.initial_quota)
                .min(info.max_quota),
            max_quota: info.max_quota,
            accrual_rate_per_sec: info
                .quota_accrual_rate_per_sec
                .unwrap_or(info.max_quota / 60.0),
        }
    }

    /// Build a tracker. `carried_over` is the remaining quota of the tracker
    /// this one replaces; it wins over `initial_quota` so a reload never
    /// refills a drained bucket.
    pub fn tracker(
        &self,
        clock: Arc<dyn Clock>,
        carried_over: Option<f64>,
    ) -> Result<QuotaTracker, Report<QuotaError>> {
        let initial = carried_over
            .map(|quota| quota.min(self.max_quota))
            .unwrap_or(self.initial_quota);
        QuotaTracker::with_initial_quota(clock, self.max_quota, self.accrual_rate_per_sec, initial)
    }
}

/// Quotas used when the collector does not send any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaDefaults {
    pub stream: QuotaSettings,
    pub global: QuotaSettings,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            stream: QuotaSettings::STREAM_DEFAULT,
            global: QuotaSettings::GLOBAL_DEFAULT,
        }
    }
}

/// Collects compile problems as collector facing errors.
#[derive(Debug)]
pub(crate) struct Diagnostics<'a> {
    etag: &'a str,
    errors: Vec<CollectionConfigurationError>,
}

impl<'a> Diagnostics<'a> {
    fn new(etag: &'a str) -> Self {
        Self {
            etag,
            errors: Vec::new(),
        }
    }

    pub(crate) fn report<C: Context>(
        &mut self,
        error_type: CollectionConfigurationErrorType,
        report: &Report<C>,
        data: impl IntoIterator<Item = (&'static str, String)>,
    ) {
        let data: Vec<_> = data
            .into_iter()
            .chain([(ETAG, self.etag.to_string())])
            .collect();
        tracing::debug!(
            ?error_type,
            etag = self.etag,
            error = %report.current_context(),
            "Collection configuration item rejected"
        );
        self.errors.push(CollectionConfigurationError::new(
            error_type,
            report.current_context().to_string(),
            format!("{report:?}"),
            data,
        ));
    }

    fn duplicate(&mut self, error_type: CollectionConfigurationErrorType, key: &'static str, id: &str) {
        tracing::debug!(?error_type, id, "Duplicate id in collection configuration");
        self.errors.push(CollectionConfigurationError::new(
            error_type,
            format!("Duplicate id '{id}', the item is ignored"),
            String::new(),
            [(key, id.to_string()), (ETAG, self.etag.to_string())],
        ));
    }

    pub(crate) fn filter_failures(
        &mut self,
        owner_key: &'static str,
        owner_id: &str,
        failures: Vec<FilterFailure>,
    ) {
        for (info, report) in failures {
            self.report(
                CollectionConfigurationErrorType::FilterFailureToCreateUnexpected,
                &report,
                [
                    (owner_key, owner_id.to_string()),
                    ("FilterFieldName", info.field_name),
                    ("FilterPredicate", info.predicate.to_string()),
                    ("FilterComparand", info.comparand),
                ],
            );
        }
    }
}

/// Telemetry types the configuration collects.
pub trait ConfiguredTelemetry: FilterableTelemetry + IntoDocument + Sized {
    fn stream_groups(stream: &DocumentStream) -> &[FilterConjunctionGroup<Self>];

    fn metrics(configuration: &CollectionConfiguration) -> &[CalculatedMetric<Self>];
}

macro_rules! configured_telemetry {
    ($telemetry:ty, $groups:ident, $metrics:ident) => {
        impl ConfiguredTelemetry for $telemetry {
            fn stream_groups(stream: &DocumentStream) -> &[FilterConjunctionGroup<Self>] {
                &stream.$groups
            }

            fn metrics(configuration: &CollectionConfiguration) -> &[CalculatedMetric<Self>] {
                &configuration.$metrics
            }
        }
    };
}

configured_telemetry!(RequestTelemetry, requests, request_metrics);
configured_telemetry!(DependencyTelemetry, dependencies, dependency_metrics);
configured_telemetry!(ExceptionTelemetry, exceptions, exception_metrics);
configured_telemetry!(EventTelemetry, events, event_metrics);
configured_telemetry!(TraceTelemetry, traces, trace_metrics);

/// Immutable compiled form of a [`CollectionConfigurationInfo`].
#[derive(Debug)]
pub struct CollectionConfiguration {
    etag: String,
    request_metrics: Vec<CalculatedMetric<RequestTelemetry>>,
    dependency_metrics: Vec<CalculatedMetric<DependencyTelemetry>>,
    exception_metrics: Vec<CalculatedMetric<ExceptionTelemetry>>,
    event_metrics: Vec<CalculatedMetric<EventTelemetry>>,
    trace_metrics: Vec<CalculatedMetric<TraceTelemetry>>,
    /// Id and aggregation of every metric, by accumulator slot.
    metric_ids: Vec<(String, AggregationType)>,
    document_streams: Vec<DocumentStream>,
    global_quota: QuotaSettings,
}

impl CollectionConfiguration {
    /// Configuration in effect before the collector sent one: collects the
    /// built-in counters only.
    pub fn empty() -> Self {
        Self::empty_with_defaults(&QuotaDefaults::default())
    }

    pub fn empty_with_defaults(defaults: &QuotaDefaults) -> Self {
        Self {
            etag: String::new(),
            request_metrics: Vec::new(),
            dependency_metrics: Vec::new(),
            exception_metrics: Vec::new(),
            event_metrics: Vec::new(),
            trace_metrics: Vec::new(),
            metric_ids: Vec::new(),
            document_streams: Vec::new(),
            global_quota: defaults.global,
        }
    }

    /// Compile `info`.
    ///
    /// Streams that also exist in `previous` keep their remaining quota.
    pub fn compile(
        info: &CollectionConfigurationInfo,
        clock: Arc<dyn Clock>,
        previous: Option<&CollectionConfiguration>,
    ) -> (Self, Vec<CollectionConfigurationError>) {
        Self::compile_with_defaults(info, clock, previous, &QuotaDefaults::default())
    }

    /// Like [`compile`](Self::compile), falling back to `defaults` for
    /// quotas the collector left out.
    pub fn compile_with_defaults(
        info: &CollectionConfigurationInfo,
        clock: Arc<dyn Clock>,
        previous: Option<&CollectionConfiguration>,
        defaults: &QuotaDefaults,
    ) -> (Self, Vec<CollectionConfigurationError>) {
        let mut diagnostics = Diagnostics::new(&info.etag);
        let mut configuration = Self {
            etag: info.etag.clone(),
            global_quota: QuotaSettings::resolve(info.global_quota_info.as_ref(), defaults.global),
            ..Self::empty_with_defaults(defaults)
        };

        let mut metric_ids = HashSet::new();
        for metric_info in &info.metrics {
            if !metric_ids.insert(metric_info.id.as_str()) {
                diagnostics.duplicate(
                    CollectionConfigurationErrorType::MetricDuplicateIds,
                    METRIC_ID,
                    &metric_info.id,
                );
                continue;
            }
            configuration.add_metric(metric_info, &mut diagnostics);
        }

        let stream_quota =
            QuotaSettings::resolve(info.quota_info.as_ref(), defaults.stream);
        let mut stream_ids = HashSet::new();
        for stream_info in &info.document_streams {
            if !stream_ids.insert(stream_info.id.as_str()) {
                diagnostics.duplicate(
                    CollectionConfigurationErrorType::DocumentStreamDuplicateIds,
                    STREAM_ID,
                    &stream_info.id,
                );
                continue;
            }

            let carried_over = previous
                .and_then(|previous| previous.document_stream(&stream_info.id))
                .map(|stream| stream.quota().current_quota());
            let quota = match stream_quota.tracker(clock.clone(), carried_over) {
                Ok(quota) => quota,
                Err(report) => {
                    diagnostics.report(
                        CollectionConfigurationErrorType::DocumentStreamFailureToCreate,
                        &report,
                        [(STREAM_ID, stream_info.id.clone())],
                    );
                    continue;
                }
            };

            configuration
                .document_streams
                .push(DocumentStream::compile(stream_info, quota, &mut diagnostics));
        }

        tracing::info!(
            etag = %configuration.etag,
            metrics = configuration.metric_ids.len(),
            document_streams = configuration.document_streams.len(),
            errors = diagnostics.errors.len(),
            "Collection configuration compiled"
        );

        (configuration, diagnostics.errors)
    }

    fn add_metric(&mut self, info: &CalculatedMetricInfo, diagnostics: &mut Diagnostics<'_>) {
        let index = self.metric_ids.len();
        let added = match info.telemetry_type {
            TelemetryType::Request => {
                compile_metric(info, index, diagnostics, &mut self.request_metrics)
            }
            TelemetryType::Dependency => {
                compile_metric(info, index, diagnostics, &mut self.dependency_metrics)
            }
            TelemetryType::Exception => {
                compile_metric(info, index, diagnostics, &mut self.exception_metrics)
            }
            TelemetryType::Event => compile_metric(info, index, diagnostics, &mut self.event_metrics),
            TelemetryType::Trace => compile_metric(info, index, diagnostics, &mut self.trace_metrics),
            telemetry_type @ (TelemetryType::Metric | TelemetryType::PerformanceCounter) => {
                diagnostics.report(
                    CollectionConfigurationErrorType::MetricTelemetryTypeUnsupported,
                    &report!(ConfigurationError::UnsupportedTelemetryType { telemetry_type }),
                    [(METRIC_ID, info.id.clone())],
                );
                false
            }
        };
        if added {
            self.metric_ids.push((info.id.clone(), info.aggregation));
        }
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn metric_ids(&self) -> &[(String, AggregationType)] {
        &self.metric_ids
    }

    pub fn document_streams(&self) -> &[DocumentStream] {
        &self.document_streams
    }

    pub fn document_stream(&self, id: &str) -> Option<&DocumentStream> {
        self.document_streams.iter().find(|stream| stream.id() == id)
    }

    pub fn global_quota(&self) -> QuotaSettings {
        self.global_quota
    }
}

fn compile_metric<T: FilterableTelemetry>(
    info: &CalculatedMetricInfo,
    index: usize,
    diagnostics: &mut Diagnostics<'_>,
    metrics: &mut Vec<CalculatedMetric<T>>,
) -> bool {
    let (metric, failures) = CalculatedMetric::compile(info, index);
    diagnostics.filter_failures(METRIC_ID, &info.id, failures);
    match metric {
        Ok(metric) => {
            metrics.push(metric);
            true
        }
        Err(report) => {
            diagnostics.report(
                CollectionConfigurationErrorType::MetricFailureToCreate,
                &report,
                [(METRIC_ID, info.id.clone())],
            );
            false
        }
    }
}
