//! Error types for collector communication.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for communication operations.
pub type CommResult<T> = Result<T, Report<CommError>>;

/// Errors that can occur while talking to the collector.
///
/// None of these are fatal: the collection state machine treats every
/// failed call as an inconclusive answer and backs off.
#[derive(Debug, Display)]
pub enum CommError {
    /// Network connectivity issues
    #[display("Network error: {message}")]
    Network { message: String },

    /// Non-success HTTP status
    #[display("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Serialization/deserialization errors
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration errors
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Timeout errors
    #[display("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl Error for CommError {}
