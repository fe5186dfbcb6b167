//! Token-bucket quota tracking for live telemetry capture.
//!
//! This crate provides two building blocks:
//! - [`Clock`]: the time source shared by every tracker, with a
//!   [`ManualClock`] that tests can move by hand
//! - [`QuotaTracker`]: lock-free token bucket admitting one unit per call
//!
//! Trackers accrue quota lazily inside each call, so an idle tracker costs
//! nothing and a burst after a quiet period can never exceed the max quota.

use error_stack::Report;

mod clock;
mod error;
mod tracker;

/// Result type using error-stack for context-rich error reporting
pub type Result<T, C> = core::result::Result<T, Report<C>>;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::QuotaError;
pub use tracker::QuotaTracker;
