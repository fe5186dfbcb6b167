use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::KeyValuePairString;

/// A full telemetry item captured for one or more document streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelemetryDocument {
    pub id: Uuid,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub properties: Vec<KeyValuePairString>,
    /// Ids of every document stream whose quota admitted this item.
    #[serde(default)]
    pub document_stream_ids: Vec<String>,
    #[serde(flatten)]
    pub details: DocumentDetails,
}

/// Type specific part of a [`TelemetryDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "DocumentType", rename_all_fields = "PascalCase")]
pub enum DocumentDetails {
    Request {
        name: String,
        success: bool,
        /// milliseconds
        duration: f64,
        response_code: String,
        url: Option<String>,
    },
    Dependency {
        name: String,
        target: Option<String>,
        success: bool,
        /// milliseconds
        duration: f64,
        result_code: Option<String>,
        command_name: Option<String>,
        dependency_type_name: Option<String>,
    },
    Exception {
        /// Type, message and stack trace of the whole exception chain.
        exception: String,
        exception_message: String,
        exception_type: String,
    },
    Event {
        name: String,
    },
    Trace {
        message: String,
        severity_level: Option<String>,
    },
}

impl DocumentDetails {
    pub fn document_type(&self) -> &'static str {
        match self {
            DocumentDetails::Request { .. } => "Request",
            DocumentDetails::Dependency { .. } => "Dependency",
            DocumentDetails::Exception { .. } => "Exception",
            DocumentDetails::Event { .. } => "Event",
            DocumentDetails::Trace { .. } => "Trace",
        }
    }
}
