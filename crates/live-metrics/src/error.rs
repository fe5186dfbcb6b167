use core::error::Error;

use api_types::Predicate;
use api_types::TelemetryType;
use derive_more::Display;

/// Why a filter definition could not be compiled.
#[derive(Debug, Display)]
pub enum FilterError {
    #[display("Field '{field}' does not exist on {telemetry_type} telemetry")]
    UnknownField {
        field: String,
        telemetry_type: TelemetryType,
    },

    #[display("Predicate {predicate} is not supported for field '{field}'")]
    UnsupportedPredicate { field: String, predicate: Predicate },

    #[display("Comparand '{comparand}' cannot be compared with field '{field}'")]
    InvalidComparand { field: String, comparand: String },
}

impl Error for FilterError {}

/// Why a calculated metric or document stream definition was rejected.
#[derive(Debug, Display)]
pub enum ConfigurationError {
    #[display("Projection '{projection}' is not a numeric field of {telemetry_type} telemetry")]
    InvalidProjection {
        projection: String,
        telemetry_type: TelemetryType,
    },

    #[display("Telemetry type {telemetry_type} is not supported")]
    UnsupportedTelemetryType { telemetry_type: TelemetryType },

    #[display("Invalid quota: {message}")]
    InvalidQuota { message: String },
}

impl Error for ConfigurationError {}

/// Contract violations of the collection lifecycle.
#[derive(Debug, Display)]
pub enum ProcessorError {
    #[display("Collection is already running")]
    AlreadyCollecting,

    #[display("Collection is not running")]
    NotCollecting,

    #[display("Global quota could not be applied")]
    InvalidGlobalQuota,
}

impl Error for ProcessorError {}

#[derive(Debug, Display)]
pub enum ModuleError {
    #[display("Failed to apply collection configuration")]
    Configuration,

    #[display("State thread error: {message}")]
    Thread { message: String },
}

impl Error for ModuleError {}
