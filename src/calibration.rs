//! Adaptive calibration search.
//!
//! Sweeps the two sensitivity registers — noise floor level (0..=7) and
//! spike rejection (0..=15) — from most sensitive to least, looking for
//! the first candidate whose spurious-event rate stays at or below the
//! configured target. First found wins, which biases the result toward
//! maximum sensitivity. Candidate writes are exploratory: no snapshot is
//! taken, because the sweep's whole point is to move through settings.
//!
//! Cancellation is cooperative and checked between sampling windows. A
//! cancelled sweep leaves the last applied candidate in place rather than
//! rolling back; the operator asked to stop, not to undo, and the status
//! record says exactly where the sweep stopped.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::info;
use serde::Serialize;

use crate::adapters::time::Clock;
use crate::bus::SharedBus;
use crate::classify::EventCounters;
use crate::config::CalibrationTuning;
use crate::error::Result;
use crate::registers::{NOISE_FLOOR, SPIKE_REJECTION};

/// Lifecycle of a calibration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl CalibrationState {
    /// A sweep may start from any state except `Running`.
    pub fn can_start(self) -> bool {
        self != Self::Running
    }
}

/// Progress and outcome of the current (or last) sweep.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationStatus {
    pub state: CalibrationState,
    pub initial_noise_level: u8,
    pub initial_spike_rejection: u8,
    /// Last candidate applied to the sensor. On completion this is the
    /// winner; on cancellation it is whatever was in place when the flag
    /// was seen.
    pub final_noise_level: u8,
    pub final_spike_rejection: u8,
    pub windows_sampled: u32,
    pub spurious_total: u32,
    pub lightning_total: u32,
    pub message: String,
}

impl Default for CalibrationStatus {
    fn default() -> Self {
        Self {
            state: CalibrationState::Idle,
            initial_noise_level: 0,
            initial_spike_rejection: 0,
            final_noise_level: 0,
            final_spike_rejection: 0,
            windows_sampled: 0,
            spurious_total: 0,
            lightning_total: 0,
            message: String::new(),
        }
    }
}

/// Everything the sweep needs, borrowed from the monitor context.
pub struct SweepContext<'a> {
    pub bus: &'a SharedBus,
    pub counters: &'a EventCounters,
    pub status: &'a Mutex<CalibrationStatus>,
    pub cancel: &'a AtomicBool,
    /// Classifier feeds the counters while this is set.
    pub counting: &'a AtomicBool,
    pub tuning: &'a CalibrationTuning,
    pub clock: &'a dyn Clock,
}

fn with_status(status: &Mutex<CalibrationStatus>, f: impl FnOnce(&mut CalibrationStatus)) {
    let mut guard = status.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard);
}

/// Run the full 2-D sweep to a terminal state.
///
/// Returns `Err` only on a bus or guard failure; a cancelled or exhausted
/// sweep is a normal outcome recorded in the status. On error the sweep
/// stops where it is and the status message carries the failure.
pub fn run_sweep(ctx: &SweepContext<'_>) -> Result<()> {
    let result = sweep_inner(ctx);
    ctx.counting.store(false, Ordering::Release);

    // Whatever went wrong, the status must leave Running so the next
    // start is not rejected against a task that no longer exists.
    if let Err(e) = &result {
        with_status(ctx.status, |s| {
            s.state = CalibrationState::Cancelled;
            s.message = format!("sweep aborted: {e}");
        });
    }
    result
}

fn sweep_inner(ctx: &SweepContext<'_>) -> Result<()> {
    let initial_noise = ctx.bus.read_field(NOISE_FLOOR)?;
    let initial_spike = ctx.bus.read_field(SPIKE_REJECTION)?;

    with_status(ctx.status, |s| {
        *s = CalibrationStatus {
            state: CalibrationState::Running,
            initial_noise_level: initial_noise,
            initial_spike_rejection: initial_spike,
            final_noise_level: initial_noise,
            final_spike_rejection: initial_spike,
            ..CalibrationStatus::default()
        };
    });

    ctx.cancel.store(false, Ordering::Release);
    ctx.counting.store(true, Ordering::Release);
    sweep_candidates(ctx)
}

fn sweep_candidates(ctx: &SweepContext<'_>) -> Result<()> {
    let window_secs = ctx.tuning.window_secs;
    let windows = ctx.tuning.windows_per_candidate;

    // Last candidate actually written to the sensor; until the first
    // apply, that is whatever the sweep started from.
    let mut last = {
        let s = ctx.status.lock().unwrap_or_else(|p| p.into_inner());
        (s.final_noise_level, s.final_spike_rejection)
    };
    for noise in 0..=NOISE_FLOOR.max_value() {
        for spike in 0..=SPIKE_REJECTION.max_value() {
            if cancelled(ctx, last.0, last.1) {
                return Ok(());
            }

            // Exploratory apply — deliberately no snapshot here.
            ctx.bus.update_field(NOISE_FLOOR, noise)?;
            ctx.bus.update_field(SPIKE_REJECTION, spike)?;
            last = (noise, spike);
            with_status(ctx.status, |s| {
                s.final_noise_level = noise;
                s.final_spike_rejection = spike;
            });

            // Discard anything counted while the candidate was applied.
            let _ = ctx.counters.take();

            let mut spurious = 0u32;
            for _ in 0..windows {
                ctx.clock.sleep_ms(window_secs * 1_000);
                if cancelled(ctx, noise, spike) {
                    return Ok(());
                }
                let sample = ctx.counters.take();
                spurious += sample.spurious;
                with_status(ctx.status, |s| {
                    s.windows_sampled += 1;
                    s.spurious_total += sample.spurious;
                    s.lightning_total += sample.lightning;
                });
            }

            let per_min = spurious as f32 * 60.0 / (windows * window_secs) as f32;
            info!(
                "calibration candidate noise={noise} spike={spike}: {spurious} spurious ({per_min:.1}/min)"
            );
            if per_min <= ctx.tuning.target_spurious_per_min {
                with_status(ctx.status, |s| {
                    s.state = CalibrationState::Completed;
                    s.message =
                        format!("settled at noise={noise} spike={spike} ({per_min:.1} spurious/min)");
                });
                return Ok(());
            }
        }
    }

    // Every candidate was too noisy. The last tried (least sensitive)
    // setting stays applied; anything more sensitive was worse.
    with_status(ctx.status, |s| {
        s.state = CalibrationState::Completed;
        s.message = format!(
            "no candidate met target; keeping least sensitive noise={} spike={}",
            last.0, last.1
        );
    });
    Ok(())
}

fn cancelled(ctx: &SweepContext<'_>, noise: u8, spike: u8) -> bool {
    if !ctx.cancel.load(Ordering::Acquire) {
        return false;
    }
    with_status(ctx.status, |s| {
        s.state = CalibrationState::Cancelled;
        s.message = format!("cancelled; noise={noise} spike={spike} left applied");
    });
    info!("calibration cancelled at noise={noise} spike={spike}");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{RegisterBus, RetryPolicy, SharedBus};
    use crate::error::BusError;
    use std::sync::Arc;
    use std::time::Duration;

    struct TestBus {
        regs: [u8; 0x40],
    }

    impl RegisterBus for TestBus {
        fn read_register(&mut self, addr: u8) -> core::result::Result<u8, BusError> {
            Ok(self.regs[addr as usize])
        }
        fn write_register(&mut self, addr: u8, value: u8) -> core::result::Result<(), BusError> {
            self.regs[addr as usize] = value;
            Ok(())
        }
    }

    /// Clock whose sleeps complete instantly and run a script instead:
    /// each "window" injects a canned spurious count, and optionally trips
    /// the cancel flag.
    struct ScriptClock {
        counters: Arc<EventCounters>,
        spurious_per_window: Mutex<Vec<u32>>,
        cancel_after: Option<(u32, Arc<AtomicBool>)>,
        windows_elapsed: Mutex<u32>,
    }

    impl Clock for ScriptClock {
        fn uptime_us(&self) -> u64 {
            0
        }

        fn sleep_ms(&self, _ms: u32) {
            let mut script = self.spurious_per_window.lock().unwrap();
            let spurious = if script.is_empty() { 0 } else { script.remove(0) };
            for _ in 0..spurious {
                self.counters
                    .record(crate::classify::SensorEvent::Disturber, 100);
            }
            let mut elapsed = self.windows_elapsed.lock().unwrap();
            *elapsed += 1;
            if let Some((after, flag)) = &self.cancel_after {
                if *elapsed >= *after {
                    flag.store(true, Ordering::Release);
                }
            }
        }
    }

    struct Fixture {
        bus: SharedBus,
        counters: Arc<EventCounters>,
        status: Mutex<CalibrationStatus>,
        cancel: Arc<AtomicBool>,
        counting: AtomicBool,
        tuning: CalibrationTuning,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bus: SharedBus::new(
                    Box::new(TestBus { regs: [0; 0x40] }),
                    Duration::from_millis(50),
                    RetryPolicy::default(),
                ),
                counters: Arc::new(EventCounters::new()),
                status: Mutex::new(CalibrationStatus::default()),
                cancel: Arc::new(AtomicBool::new(false)),
                counting: AtomicBool::new(false),
                tuning: CalibrationTuning {
                    window_secs: 1,
                    windows_per_candidate: 1,
                    target_spurious_per_min: 2.0,
                    spurious_energy_max: 100,
                },
            }
        }

        fn clock(&self, script: Vec<u32>, cancel_after: Option<u32>) -> ScriptClock {
            ScriptClock {
                counters: Arc::clone(&self.counters),
                spurious_per_window: Mutex::new(script),
                cancel_after: cancel_after.map(|n| (n, Arc::clone(&self.cancel))),
                windows_elapsed: Mutex::new(0),
            }
        }

        fn run(&self, clock: &ScriptClock) -> Result<()> {
            let ctx = SweepContext {
                bus: &self.bus,
                counters: &self.counters,
                status: &self.status,
                cancel: &self.cancel,
                counting: &self.counting,
                tuning: &self.tuning,
                clock,
            };
            run_sweep(&ctx)
        }

        fn status(&self) -> CalibrationStatus {
            self.status.lock().unwrap().clone()
        }
    }

    #[test]
    fn first_quiet_candidate_wins() {
        let fx = Fixture::new();
        let clock = fx.clock(vec![], None); // always silent
        fx.run(&clock).unwrap();

        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Completed);
        assert_eq!((s.final_noise_level, s.final_spike_rejection), (0, 0));
        assert_eq!(s.windows_sampled, 1);
        assert!(!fx.counting.load(Ordering::Acquire));
    }

    #[test]
    fn sweep_advances_past_noisy_candidates() {
        let fx = Fixture::new();
        // 1 window/candidate: candidates (0,0) and (0,1) are noisy, (0,2) quiet.
        let clock = fx.clock(vec![10, 10], None);
        fx.run(&clock).unwrap();

        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Completed);
        assert_eq!((s.final_noise_level, s.final_spike_rejection), (0, 2));
        assert_eq!(s.windows_sampled, 3);
        assert_eq!(s.spurious_total, 20);
        // The winner is actually applied to the hardware.
        assert_eq!(fx.bus.read_field(SPIKE_REJECTION).unwrap(), 2);
    }

    #[test]
    fn cancel_stops_without_rollback() {
        let fx = Fixture::new();
        // Every candidate noisy; cancel after the third window.
        let clock = ScriptClock {
            counters: Arc::clone(&fx.counters),
            spurious_per_window: Mutex::new(vec![10; 200]),
            cancel_after: Some((3, Arc::clone(&fx.cancel))),
            windows_elapsed: Mutex::new(0),
        };
        fx.run(&clock).unwrap();

        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Cancelled);
        // Candidate (0,2) was applied before the flag was seen and stays.
        assert_eq!((s.final_noise_level, s.final_spike_rejection), (0, 2));
        assert_eq!(fx.bus.read_field(SPIKE_REJECTION).unwrap(), 2);
        assert!(s.message.contains("left applied"));
        assert!(!fx.counting.load(Ordering::Acquire));
    }

    #[test]
    fn exhausted_sweep_keeps_least_sensitive() {
        let fx = Fixture::new();
        // 8 * 16 candidates, all noisy.
        let clock = fx.clock(vec![10; 128], None);
        fx.run(&clock).unwrap();

        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Completed);
        assert_eq!((s.final_noise_level, s.final_spike_rejection), (7, 15));
        assert_eq!(s.windows_sampled, 128);
        assert!(s.message.contains("no candidate met target"));
        assert_eq!(fx.bus.read_field(NOISE_FLOOR).unwrap(), 7);
        assert_eq!(fx.bus.read_field(SPIKE_REJECTION).unwrap(), 15);
    }

    #[test]
    fn sweep_records_initial_settings() {
        let fx = Fixture::new();
        fx.bus.update_field(NOISE_FLOOR, 5).unwrap();
        fx.bus.update_field(SPIKE_REJECTION, 7).unwrap();
        let clock = fx.clock(vec![], None);
        fx.run(&clock).unwrap();

        let s = fx.status();
        assert_eq!(s.initial_noise_level, 5);
        assert_eq!(s.initial_spike_rejection, 7);
    }

    #[test]
    fn failed_sweep_leaves_a_restartable_state() {
        struct DeadBus;
        impl RegisterBus for DeadBus {
            fn read_register(&mut self, _addr: u8) -> core::result::Result<u8, BusError> {
                Err(BusError::TransferFailed)
            }
            fn write_register(&mut self, _a: u8, _v: u8) -> core::result::Result<(), BusError> {
                Err(BusError::TransferFailed)
            }
        }

        let mut fx = Fixture::new();
        fx.bus = SharedBus::new(
            Box::new(DeadBus),
            Duration::from_millis(50),
            RetryPolicy::default(),
        );
        // Mimic the claim a starter makes before spawning the sweep.
        fx.status.lock().unwrap().state = CalibrationState::Running;

        let clock = fx.clock(vec![], None);
        assert!(fx.run(&clock).is_err());

        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Cancelled);
        assert!(s.state.can_start(), "a dead bus must not wedge the state machine");
        assert!(s.message.contains("sweep aborted"));
        assert!(!fx.counting.load(Ordering::Acquire));
    }

    #[test]
    fn early_cancel_reports_the_applied_candidate() {
        let fx = Fixture::new();
        // Sweep starting point, as run_sweep would record it.
        {
            let mut s = fx.status.lock().unwrap();
            s.final_noise_level = 5;
            s.final_spike_rejection = 7;
        }
        fx.cancel.store(true, Ordering::Release);

        let clock = fx.clock(vec![], None);
        let ctx = SweepContext {
            bus: &fx.bus,
            counters: &fx.counters,
            status: &fx.status,
            cancel: &fx.cancel,
            counting: &fx.counting,
            tuning: &fx.tuning,
            clock: &clock,
        };
        sweep_candidates(&ctx).unwrap();

        // Nothing was written; the message must name what is actually
        // on the sensor, not the candidate that never got applied.
        let s = fx.status();
        assert_eq!(s.state, CalibrationState::Cancelled);
        assert!(s.message.contains("noise=5 spike=7"));
        assert_eq!(fx.bus.read_field(NOISE_FLOOR).unwrap(), 0);
    }

    #[test]
    fn state_machine_start_rules() {
        assert!(CalibrationState::Idle.can_start());
        assert!(CalibrationState::Completed.can_start());
        assert!(CalibrationState::Cancelled.can_start());
        assert!(!CalibrationState::Running.can_start());
    }
}
