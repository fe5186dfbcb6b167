use serde::Deserialize;
use serde::Serialize;

/// Telemetry types a filter group or calculated metric can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryType {
    Request,
    Dependency,
    Exception,
    Event,
    Metric,
    PerformanceCounter,
    Trace,
}

impl std::fmt::Display for TelemetryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Comparison applied between a telemetry field and a filter comparand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Contains,
    DoesNotContain,
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Aggregation of a calculated metric over one collection interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    Avg,
    Sum,
    Min,
    Max,
}

impl std::fmt::Display for AggregationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A single `field predicate comparand` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterInfo {
    pub field_name: String,
    pub predicate: Predicate,
    /// Always transmitted as a string, parsed against the field type.
    pub comparand: String,
}

impl FilterInfo {
    pub fn new(
        field_name: impl Into<String>,
        predicate: Predicate,
        comparand: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            predicate,
            comparand: comparand.into(),
        }
    }
}

impl std::fmt::Display for FilterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field_name, self.predicate, self.comparand)
    }
}

/// Filters that must all match (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterConjunctionGroupInfo {
    #[serde(default)]
    pub filters: Vec<FilterInfo>,
}

/// Per telemetry type filter group of a document stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentFilterConjunctionGroupInfo {
    pub telemetry_type: TelemetryType,
    pub filters: FilterConjunctionGroupInfo,
}

/// A named selection of full telemetry documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentStreamInfo {
    pub id: String,
    #[serde(default)]
    pub document_filter_groups: Vec<DocumentFilterConjunctionGroupInfo>,
}

/// A user-defined aggregation over filtered telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CalculatedMetricInfo {
    pub id: String,
    pub telemetry_type: TelemetryType,
    #[serde(default)]
    pub filter_groups: Vec<FilterConjunctionGroupInfo>,
    /// A field name or `Count()`.
    pub projection: String,
    pub aggregation: AggregationType,
}

/// Token bucket parameters for document capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QuotaConfigurationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_quota: Option<f64>,
    pub max_quota: f64,
    /// Defaults to `max_quota` per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_accrual_rate_per_sec: Option<f64>,
}

/// Collection configuration as handed out by the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CollectionConfigurationInfo {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(default)]
    pub metrics: Vec<CalculatedMetricInfo>,
    #[serde(default)]
    pub document_streams: Vec<DocumentStreamInfo>,
    /// Per document stream quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_info: Option<QuotaConfigurationInfo>,
    /// Quota shared by every document stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_quota_info: Option<QuotaConfigurationInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionConfigurationErrorType {
    Unknown,
    DocumentStreamDuplicateIds,
    DocumentStreamFailureToCreate,
    DocumentStreamFailureToCreateFilterUnexpected,
    MetricDuplicateIds,
    MetricTelemetryTypeUnsupported,
    MetricFailureToCreate,
    MetricFailureToCreateFilterUnexpected,
    FilterFailureToCreateUnexpected,
    CollectionConfigurationFailureToCreateUnexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValuePairString {
    pub key: String,
    pub value: String,
}

impl KeyValuePairString {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Problem found while compiling a collection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CollectionConfigurationError {
    pub collection_configuration_error_type: CollectionConfigurationErrorType,
    pub message: String,
    pub full_exception: String,
    pub data: Vec<KeyValuePairString>,
}

impl CollectionConfigurationError {
    pub fn new(
        error_type: CollectionConfigurationErrorType,
        message: impl Into<String>,
        full_exception: impl Into<String>,
        data: impl IntoIterator<Item = (&'static str, String)>,
    ) -> Self {
        Self {
            collection_configuration_error_type: error_type,
            message: message.into(),
            full_exception: full_exception.into(),
            data: data
                .into_iter()
                .map(|(key, value)| KeyValuePairString::new(key, value))
                .collect(),
        }
    }

    pub fn error_type(&self) -> CollectionConfigurationErrorType {
        self.collection_configuration_error_type
    }

    /// Look up a diagnostic value by key.
    pub fn data_value(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.value.as_str())
    }
}
