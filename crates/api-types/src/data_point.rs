use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::CollectionConfigurationError;
use crate::TelemetryDocument;

/// One named value of a data point. `weight` is the number of observations
/// behind `value`, so the collector can merge averages across instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub weight: u64,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64, weight: u64) -> Self {
        Self {
            name: name.into(),
            value,
            weight,
        }
    }
}

/// Payload of a ping (no metrics) or of one submitted sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitoringDataPoint {
    pub version: String,
    pub invariant_version: u32,
    pub instrumentation_key: String,
    pub role_name: String,
    pub instance: String,
    pub stream_id: String,
    pub machine_name: String,
    pub timestamp: DateTime<Utc>,
    pub is_web_app: bool,
    pub performance_collection_supported: bool,
    pub processor_count: u32,
    #[serde(default)]
    pub metrics: Vec<MetricPoint>,
    #[serde(default)]
    pub documents: Vec<TelemetryDocument>,
    pub global_document_quota_reached: bool,
    #[serde(default)]
    pub collection_configuration_errors: Vec<CollectionConfigurationError>,
}

impl MonitoringDataPoint {
    pub fn metric(&self, name: &str) -> Option<&MetricPoint> {
        self.metrics.iter().find(|metric| metric.name == name)
    }
}
