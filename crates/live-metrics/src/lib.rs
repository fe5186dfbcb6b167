//! Live metrics agent.
//!
//! Taps a host's telemetry pipeline and streams near real-time data to a
//! remote collector while someone is watching:
//!
//! - [`LiveMetricsProcessor`] sits in the pipeline, counts every item and,
//!   during a collection, feeds calculated metrics and captures documents
//!   within their quotas
//! - [`CollectionConfiguration`] compiles what the collector asked for:
//!   filters, calculated metrics and document streams
//! - [`CollectionStateManager`] pings the collector while idle and submits
//!   one [`DataSample`] per interval while collecting
//! - [`LiveMetricsModule`] wires these together and runs the background thread
//!
//! # Examples
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use collector_client::{BlockingServiceClient, ClientConfig};
//! # use error_stack::{Report, ResultExt};
//! # use live_metrics::{LiveMetricsModule, ModuleConfig, ModuleError, Telemetry, TelemetryProcessor};
//! # use quota::SystemClock;
//! # struct Exporter;
//! # impl TelemetryProcessor for Exporter { fn process(&self, _item: Telemetry) {} }
//! # fn main() -> Result<(), Report<ModuleError>> {
//! let client = ClientConfig::with_default_endpoint()
//!     .and_then(BlockingServiceClient::new)
//!     .change_context(ModuleError::Configuration)?;
//! let module = LiveMetricsModule::new(
//!     ModuleConfig::new("my-ikey"),
//!     Arc::new(client),
//!     Arc::new(SystemClock),
//! );
//! let processor = module.register_processor(Arc::new(Exporter))?;
//! module.start()?;
//!
//! // hand every item to `processor.process(..)` from the host pipeline
//!
//! module.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod calculated_metric;
pub mod collection_configuration;
pub mod document;
pub mod document_stream;
pub mod error;
pub mod filter;
pub mod module;
pub mod processor;
pub mod sample;
pub mod state_manager;
pub mod telemetry;
pub mod time_slot;

pub use accumulator::AccumulatorManager;
pub use accumulator::DataAccumulator;
pub use collection_configuration::CollectionConfiguration;
pub use collection_configuration::QuotaDefaults;
pub use collection_configuration::QuotaSettings;
pub use document_stream::DocumentStream;
pub use error::ConfigurationError;
pub use error::FilterError;
pub use error::ModuleError;
pub use error::ProcessorError;
pub use module::LiveMetricsModule;
pub use module::ModuleConfig;
pub use processor::LiveMetricsProcessor;
pub use processor::TelemetryProcessor;
pub use sample::DataSample;
pub use state_manager::CollectionActions;
pub use state_manager::CollectionState;
pub use state_manager::CollectionStateManager;
pub use state_manager::Timings;
pub use telemetry::DependencyTelemetry;
pub use telemetry::EventTelemetry;
pub use telemetry::ExceptionInfo;
pub use telemetry::ExceptionTelemetry;
pub use telemetry::RequestTelemetry;
pub use telemetry::SeverityLevel;
pub use telemetry::Telemetry;
pub use telemetry::TelemetryContext;
pub use telemetry::TraceTelemetry;
pub use time_slot::CollectionTimeSlotManager;
