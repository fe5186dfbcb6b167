//! Lock-free token bucket.
//!
//! Quota is stored in fixed-point micro-units so that accrual and
//! consumption never drift, no matter how many threads race on the bucket.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use error_stack::report;

use crate::clock::Clock;
use crate::QuotaError;
use crate::Result;

const UNITS_PER_QUOTA: i64 = 1_000_000;

/// Token bucket that admits one unit per successful [`QuotaTracker::apply_quota`].
///
/// Quota accrues at `accrual_rate_per_sec` for every whole second elapsed
/// since the tracker was created and is capped at `max_quota`. Accrual is
/// computed inside each call, there is no background refill.
#[derive(Debug)]
pub struct QuotaTracker {
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    max_units: i64,
    accrual_units_per_sec: i64,
    /// Remaining quota in micro-units.
    units: AtomicI64,
    /// Whole seconds since `started_at` already converted into quota.
    accrued_seconds: AtomicI64,
}

impl QuotaTracker {
    /// Create a tracker that starts full.
    pub fn new(
        clock: Arc<dyn Clock>,
        max_quota: f64,
        accrual_rate_per_sec: f64,
    ) -> Result<Self, QuotaError> {
        Self::with_initial_quota(clock, max_quota, accrual_rate_per_sec, max_quota)
    }

    /// Create a tracker with an explicit starting allowance.
    ///
    /// `initial_quota` above `max_quota` is clamped to `max_quota`.
    pub fn with_initial_quota(
        clock: Arc<dyn Clock>,
        max_quota: f64,
        accrual_rate_per_sec: f64,
        initial_quota: f64,
    ) -> Result<Self, QuotaError> {
        for (name, value) in [
            ("max_quota", max_quota),
            ("accrual_rate_per_sec", accrual_rate_per_sec),
            ("initial_quota", initial_quota),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(report!(QuotaError::invalid_config(format!(
                    "{name} must be a finite non-negative number, got {value}"
                ))));
            }
        }

        let max_units = to_units(max_quota);
        let started_at = clock.now();

        Ok(Self {
            clock,
            started_at,
            max_units,
            accrual_units_per_sec: to_units(accrual_rate_per_sec),
            units: AtomicI64::new(to_units(initial_quota).min(max_units)),
            accrued_seconds: AtomicI64::new(0),
        })
    }

    /// Try to consume exactly one unit of quota.
    ///
    /// Returns `false` and leaves the quota untouched when less than one
    /// unit is available.
    pub fn apply_quota(&self) -> bool {
        self.accrue();

        let admitted = self
            .units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |units| {
                (units >= UNITS_PER_QUOTA).then(|| units - UNITS_PER_QUOTA)
            })
            .is_ok();

        if !admitted {
            tracing::trace!(
                current_quota = from_units(self.units.load(Ordering::Acquire)),
                "quota denied: less than one unit available"
            );
        }
        admitted
    }

    /// Quota available right now, including accrual up to the current second.
    pub fn current_quota(&self) -> f64 {
        self.accrue();
        from_units(self.units.load(Ordering::Acquire))
    }

    pub fn quota_exhausted(&self) -> bool {
        self.accrue();
        self.units.load(Ordering::Acquire) < UNITS_PER_QUOTA
    }

    pub fn max_quota(&self) -> f64 {
        from_units(self.max_units)
    }

    pub fn accrual_rate_per_sec(&self) -> f64 {
        from_units(self.accrual_units_per_sec)
    }

    fn accrue(&self) {
        let elapsed = (self.clock.now() - self.started_at).num_seconds().max(0);

        // Claim the seconds between the last accrual and now. Only the
        // thread that wins the exchange adds quota for them.
        let mut accrued = self.accrued_seconds.load(Ordering::Acquire);
        loop {
            if elapsed <= accrued {
                return;
            }
            match self.accrued_seconds.compare_exchange_weak(
                accrued,
                elapsed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => accrued = current,
            }
        }

        let delta = (elapsed - accrued).saturating_mul(self.accrual_units_per_sec);
        let max_units = self.max_units;
        // The closure never returns None, so the update always succeeds.
        let _ = self
            .units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |units| {
                Some(units.saturating_add(delta).min(max_units))
            });
    }
}

fn to_units(quota: f64) -> i64 {
    (quota * UNITS_PER_QUOTA as f64).round() as i64
}

fn from_units(units: i64) -> f64 {
    units as f64 / UNITS_PER_QUOTA as f64
}
