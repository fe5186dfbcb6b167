//! Named selections of full telemetry documents.

use api_types::CollectionConfigurationErrorType;
use api_types::DocumentStreamInfo;
use api_types::TelemetryType;
use error_stack::report;
use quota::QuotaTracker;

use crate::collection_configuration::ConfiguredTelemetry;
use crate::collection_configuration::Diagnostics;
use crate::error::ConfigurationError;
use crate::filter::FilterConjunctionGroup;
use crate::filter::FilterFailure;
use crate::filter::FilterableTelemetry;
use crate::telemetry::DependencyTelemetry;
use crate::telemetry::EventTelemetry;
use crate::telemetry::ExceptionTelemetry;
use crate::telemetry::RequestTelemetry;
use crate::telemetry::TraceTelemetry;

const STREAM_ID: &str = "DocumentStreamId";

/// A compiled document stream.
///
/// An item matches when any group for its telemetry type matches. A stream
/// without groups for a type never matches items of that type.
#[derive(Debug)]
pub struct DocumentStream {
    id: String,
    quota: QuotaTracker,
    pub(crate) requests: Vec<FilterConjunctionGroup<RequestTelemetry>>,
    pub(crate) dependencies: Vec<FilterConjunctionGroup<DependencyTelemetry>>,
    pub(crate) exceptions: Vec<FilterConjunctionGroup<ExceptionTelemetry>>,
    pub(crate) events: Vec<FilterConjunctionGroup<EventTelemetry>>,
    pub(crate) traces: Vec<FilterConjunctionGroup<TraceTelemetry>>,
}

impl DocumentStream {
    pub(crate) fn compile(
        info: &DocumentStreamInfo,
        quota: QuotaTracker,
        diagnostics: &mut Diagnostics<'_>,
    ) -> Self {
        let mut stream = Self {
            id: info.id.clone(),
            quota,
            requests: Vec::new(),
            dependencies: Vec::new(),
            exceptions: Vec::new(),
            events: Vec::new(),
            traces: Vec::new(),
        };

        for group_info in &info.document_filter_groups {
            let filters = &group_info.filters;
            let failures = match group_info.telemetry_type {
                TelemetryType::Request => push_group(&mut stream.requests, filters),
                TelemetryType::Dependency => push_group(&mut stream.dependencies, filters),
                TelemetryType::Exception => push_group(&mut stream.exceptions, filters),
                TelemetryType::Event => push_group(&mut stream.events, filters),
                TelemetryType::Trace => push_group(&mut stream.traces, filters),
                telemetry_type @ (TelemetryType::Metric | TelemetryType::PerformanceCounter) => {
                    diagnostics.report(
                        CollectionConfigurationErrorType::DocumentStreamFailureToCreateFilterUnexpected,
                        &report!(ConfigurationError::UnsupportedTelemetryType { telemetry_type }),
                        [(STREAM_ID, info.id.clone())],
                    );
                    continue;
                }
            };
            diagnostics.filter_failures(STREAM_ID, &info.id, failures);
        }

        stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn matches<T: ConfiguredTelemetry>(&self, item: &T) -> bool {
        T::stream_groups(self).iter().any(|group| group.matches(item))
    }
}

fn push_group<T: FilterableTelemetry>(
    groups: &mut Vec<FilterConjunctionGroup<T>>,
    info: &api_types::FilterConjunctionGroupInfo,
) -> Vec<FilterFailure> {
    let (group, failures) = FilterConjunctionGroup::compile(info);
    groups.push(group);
    failures
}
