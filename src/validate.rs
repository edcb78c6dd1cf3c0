//! Post-apply validation supervisor.
//!
//! After a settings change is applied, a validation run observes the
//! sensor for a fixed duration and compares the spurious-event count
//! against a baseline scaled to the same duration. If the new settings
//! are clearly worse, the pre-apply register snapshot is restored.
//!
//! The baseline is always referenced to a 5-second observation window:
//! `scaled_baseline = round(baseline_spurious * duration_s / 5.0)`, and
//! the regression threshold is twice that. A count of zero therefore
//! tolerates zero spurious events — a quiet baseline makes the check
//! strict, by design of the scaling, not a special case.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adapters::time::Clock;
use crate::bus::SharedBus;
use crate::classify::EventCounters;
use crate::error::Result;
use crate::snapshot::ConfigSnapshot;

/// Seconds the baseline figures refer to.
pub const BASELINE_REFERENCE_SECS: f32 = 5.0;

/// Inputs to one validation run, captured at apply time. The run owns its
/// copy; later config changes cannot retroactively alter a running check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationParams {
    /// Spurious events observed over the 5 s reference window before apply.
    pub baseline_spurious: u32,
    /// Lightning events over the same reference window (informational).
    pub baseline_lightning: u32,
    /// How long to observe the new settings, in seconds.
    pub duration_s: u32,
}

/// What a validation run concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// New settings are no worse than the scaled baseline allows.
    Passed { observed_spurious: u32 },
    /// New settings regressed; the snapshot was restored.
    RolledBack {
        observed_spurious: u32,
        allowed_spurious: u32,
    },
}

/// Scale the 5 s baseline to the observation duration.
pub fn scaled_baseline(baseline_spurious: u32, duration_s: u32) -> u32 {
    (baseline_spurious as f32 * duration_s as f32 / BASELINE_REFERENCE_SECS).round() as u32
}

/// Observe the sensor for `params.duration_s`, then pass or roll back.
///
/// A rollback is a normal outcome (`Ok(RolledBack { .. })`); only a bus,
/// guard, or restore failure is an `Err` — in particular a failed restore
/// surfaces as [`crate::error::Error::PartialRestore`] so callers can tell
/// "settings kept" apart from "rollback itself broke".
pub fn run_validation(
    bus: &SharedBus,
    counters: &EventCounters,
    snapshot: &ConfigSnapshot,
    params: ValidationParams,
    counting: &AtomicBool,
    clock: &dyn Clock,
) -> Result<ValidationOutcome> {
    // Clear anything counted before the observation starts.
    let _ = counters.take();
    counting.store(true, Ordering::Release);
    clock.sleep_ms(params.duration_s.saturating_mul(1_000));
    counting.store(false, Ordering::Release);
    let sample = counters.take();

    let allowed = scaled_baseline(params.baseline_spurious, params.duration_s).saturating_mul(2);

    if sample.spurious > allowed {
        warn!(
            "validation failed: {} spurious in {} s (allowed {}), restoring snapshot",
            sample.spurious, params.duration_s, allowed
        );
        snapshot.restore(bus)?;
        Ok(ValidationOutcome::RolledBack {
            observed_spurious: sample.spurious,
            allowed_spurious: allowed,
        })
    } else {
        info!(
            "validation passed: {} spurious in {} s (allowed {})",
            sample.spurious, params.duration_s, allowed
        );
        Ok(ValidationOutcome::Passed {
            observed_spurious: sample.spurious,
        })
    }
}
