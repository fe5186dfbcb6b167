//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the live metrics
//! agent and the remote collector: the collection configuration the
//! collector hands out, the errors the agent reports back while compiling
//! it, and the monitoring data points the agent submits.
//!
//! Field names follow the collector's PascalCase JSON contract.

mod configuration;
mod data_point;
mod document;

pub use configuration::AggregationType;
pub use configuration::CalculatedMetricInfo;
pub use configuration::CollectionConfigurationError;
pub use configuration::CollectionConfigurationErrorType;
pub use configuration::CollectionConfigurationInfo;
pub use configuration::DocumentFilterConjunctionGroupInfo;
pub use configuration::DocumentStreamInfo;
pub use configuration::FilterConjunctionGroupInfo;
pub use configuration::FilterInfo;
pub use configuration::KeyValuePairString;
pub use configuration::Predicate;
pub use configuration::QuotaConfigurationInfo;
pub use configuration::TelemetryType;
pub use data_point::MetricPoint;
pub use data_point::MonitoringDataPoint;
pub use document::DocumentDetails;
pub use document::TelemetryDocument;
