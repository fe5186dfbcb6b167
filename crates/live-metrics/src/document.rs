//! Conversion of captured items into collector documents.

use std::collections::BTreeMap;
use std::collections::HashSet;

use api_types::DocumentDetails;
use api_types::KeyValuePairString;
use api_types::TelemetryDocument;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::telemetry::effective_success;
use crate::telemetry::DependencyTelemetry;
use crate::telemetry::EventTelemetry;
use crate::telemetry::ExceptionInfo;
use crate::telemetry::ExceptionTelemetry;
use crate::telemetry::RequestTelemetry;
use crate::telemetry::TelemetryContext;
use crate::telemetry::TraceTelemetry;

/// Longest string the collector accepts in a document field.
pub const MAX_FIELD_LENGTH: usize = 32_768;

const DOCUMENT_VERSION: &str = "1.0";
const EXCEPTION_MESSAGE_SEPARATOR: &str = " <--- ";

pub trait IntoDocument {
    fn to_document(&self) -> TelemetryDocument;
}

/// Messages of the exception chain, outermost first. Empty and repeated
/// messages are skipped.
pub fn exception_message(exception: &ExceptionInfo) -> String {
    let mut seen = HashSet::new();
    exception
        .walk()
        .into_iter()
        .map(|node| node.message.as_str())
        .filter(|message| !message.is_empty() && seen.insert(*message))
        .collect::<Vec<_>>()
        .join(EXCEPTION_MESSAGE_SEPARATOR)
}

fn exception_details(exception: &ExceptionInfo) -> String {
    exception
        .walk()
        .into_iter()
        .map(|node| match &node.stack_trace {
            Some(stack) => format!("{}: {}\n{}", node.type_name, node.message, stack),
            None => format!("{}: {}", node.type_name, node.message),
        })
        .collect::<Vec<_>>()
        .join("\n ---> ")
}

pub fn truncate(value: &str) -> String {
    match value.char_indices().nth(MAX_FIELD_LENGTH) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}

fn truncate_opt(value: &Option<String>) -> Option<String> {
    value.as_deref().map(truncate)
}

/// Properties with truncated keys and values. When two keys truncate to the
/// same string the first one in key order wins.
fn truncated_properties(properties: &BTreeMap<String, String>) -> Vec<KeyValuePairString> {
    let mut seen = HashSet::new();
    properties
        .iter()
        .filter_map(|(key, value)| {
            let key = truncate(key);
            seen.insert(key.clone())
                .then(|| KeyValuePairString::new(key, truncate(value)))
        })
        .collect()
}

fn document(
    timestamp: DateTime<Utc>,
    context: &TelemetryContext,
    properties: &BTreeMap<String, String>,
    details: DocumentDetails,
) -> TelemetryDocument {
    TelemetryDocument {
        id: Uuid::new_v4(),
        version: DOCUMENT_VERSION.to_string(),
        timestamp,
        operation_id: truncate_opt(&context.operation_id),
        operation_name: truncate_opt(&context.operation_name),
        properties: truncated_properties(properties),
        document_stream_ids: Vec::new(),
        details,
    }
}

impl IntoDocument for RequestTelemetry {
    fn to_document(&self) -> TelemetryDocument {
        document(
            self.timestamp,
            &self.context,
            &self.properties,
            DocumentDetails::Request {
                name: truncate(&self.name),
                success: effective_success(self),
                duration: self.duration.as_secs_f64() * 1000.0,
                response_code: truncate(&self.response_code),
                url: truncate_opt(&self.url),
            },
        )
    }
}

impl IntoDocument for DependencyTelemetry {
    fn to_document(&self) -> TelemetryDocument {
        document(
            self.timestamp,
            &self.context,
            &self.properties,
            DocumentDetails::Dependency {
                name: truncate(&self.name),
                target: truncate_opt(&self.target),
                success: self.success,
                duration: self.duration.as_secs_f64() * 1000.0,
                result_code: truncate_opt(&self.result_code),
                command_name: truncate_opt(&self.data),
                dependency_type_name: truncate_opt(&self.dependency_type),
            },
        )
    }
}

impl IntoDocument for ExceptionTelemetry {
    fn to_document(&self) -> TelemetryDocument {
        document(
            self.timestamp,
            &self.context,
            &self.properties,
            DocumentDetails::Exception {
                exception: truncate(&exception_details(&self.exception)),
                exception_message: truncate(&exception_message(&self.exception)),
                exception_type: truncate(&self.exception.type_name),
            },
        )
    }
}

impl IntoDocument for EventTelemetry {
    fn to_document(&self) -> TelemetryDocument {
        document(
            self.timestamp,
            &self.context,
            &self.properties,
            DocumentDetails::Event {
                name: truncate(&self.name),
            },
        )
    }
}

impl IntoDocument for TraceTelemetry {
    fn to_document(&self) -> TelemetryDocument {
        document(
            self.timestamp,
            &self.context,
            &self.properties,
            DocumentDetails::Trace {
                message: truncate(&self.message),
                severity_level: self.severity_level.map(|level| level.to_string()),
            },
        )
    }
}
