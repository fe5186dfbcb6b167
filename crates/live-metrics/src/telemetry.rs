//! Telemetry items produced by the instrumented process.
//!
//! Items are read-only here. They deserialize from the agent's NDJSON input,
//! one object per line tagged by `"type"`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Ambient context attached to every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryContext {
    /// Items without a key belong to the host pipeline and are always collected.
    pub instrumentation_key: Option<String>,
    pub operation_id: Option<String>,
    pub operation_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTelemetry {
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub source: Option<String>,
    pub response_code: String,
    /// `None` when the producer did not decide; inferred from the response code.
    pub success: Option<bool>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub context: TelemetryContext,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
}

impl Default for RequestTelemetry {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            id: String::new(),
            name: String::new(),
            url: None,
            source: None,
            response_code: String::new(),
            success: None,
            duration: Duration::ZERO,
            context: TelemetryContext::default(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }
}

impl RequestTelemetry {
    /// Success as reported, or inferred from the response code when unset.
    pub fn reported_success(&self) -> bool {
        self.success
            .unwrap_or_else(|| success_from_response_code(&self.response_code))
    }
}

/// Success used for filtering and document capture.
///
/// A request marked failed without any response code is treated as
/// successful: such requests are usually aborted by the client and not
/// failures of the application.
pub fn effective_success(request: &RequestTelemetry) -> bool {
    match request.success {
        Some(false) if request.response_code.trim().is_empty() => true,
        Some(success) => success,
        None => success_from_response_code(&request.response_code),
    }
}

fn success_from_response_code(response_code: &str) -> bool {
    match response_code.trim().parse::<u16>() {
        Ok(code) => code < 400 || code == 401,
        Err(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyTelemetry {
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub name: String,
    pub target: Option<String>,
    pub dependency_type: Option<String>,
    /// Command text, e.g. the SQL statement or the full URL.
    pub data: Option<String>,
    pub result_code: Option<String>,
    pub success: bool,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub context: TelemetryContext,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
}

impl Default for DependencyTelemetry {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            id: String::new(),
            name: String::new(),
            target: None,
            dependency_type: None,
            data: None,
            result_code: None,
            success: true,
            duration: Duration::ZERO,
            context: TelemetryContext::default(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }
}

/// One node of an exception chain. `inner` holds the causes, usually one,
/// several for aggregate failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub inner: Vec<ExceptionInfo>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_inner(mut self, inner: ExceptionInfo) -> Self {
        self.inner.push(inner);
        self
    }

    /// Depth-first, outermost first.
    pub fn walk(&self) -> Vec<&ExceptionInfo> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.inner.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionTelemetry {
    pub timestamp: DateTime<Utc>,
    pub exception: ExceptionInfo,
    pub problem_id: Option<String>,
    pub context: TelemetryContext,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
}

impl Default for ExceptionTelemetry {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            exception: ExceptionInfo::default(),
            problem_id: None,
            context: TelemetryContext::default(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTelemetry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub context: TelemetryContext,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
}

impl Default for EventTelemetry {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            name: String::new(),
            context: TelemetryContext::default(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeverityLevel {
    Verbose = 0,
    Information = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceTelemetry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity_level: Option<SeverityLevel>,
    pub context: TelemetryContext,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
}

impl Default for TraceTelemetry {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            message: String::new(),
            severity_level: None,
            context: TelemetryContext::default(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }
}

/// Pre-aggregated metric. Passed through, never collected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricTelemetry {
    pub name: String,
    pub value: f64,
    pub context: TelemetryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Telemetry {
    Request(RequestTelemetry),
    Dependency(DependencyTelemetry),
    Exception(ExceptionTelemetry),
    Event(EventTelemetry),
    Trace(TraceTelemetry),
    Metric(MetricTelemetry),
}

impl Telemetry {
    pub fn context(&self) -> &TelemetryContext {
        match self {
            Telemetry::Request(item) => &item.context,
            Telemetry::Dependency(item) => &item.context,
            Telemetry::Exception(item) => &item.context,
            Telemetry::Event(item) => &item.context,
            Telemetry::Trace(item) => &item.context,
            Telemetry::Metric(item) => &item.context,
        }
    }
}

impl From<RequestTelemetry> for Telemetry {
    fn from(item: RequestTelemetry) -> Self {
        Telemetry::Request(item)
    }
}

impl From<DependencyTelemetry> for Telemetry {
    fn from(item: DependencyTelemetry) -> Self {
        Telemetry::Dependency(item)
    }
}

impl From<ExceptionTelemetry> for Telemetry {
    fn from(item: ExceptionTelemetry) -> Self {
        Telemetry::Exception(item)
    }
}

impl From<EventTelemetry> for Telemetry {
    fn from(item: EventTelemetry) -> Self {
        Telemetry::Event(item)
    }
}

impl From<TraceTelemetry> for Telemetry {
    fn from(item: TraceTelemetry) -> Self {
        Telemetry::Trace(item)
    }
}

/// Durations as fractional milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis / 1000.0).map_err(serde::de::Error::custom)
    }
}
