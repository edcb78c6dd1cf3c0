//! Monitor service facade.
//!
//! The one surface outer layers (MQTT/HTTP glue, console) talk to. It owns
//! the shared pieces — bus guard, counters, event bus, calibration status —
//! and exposes the operations as plain methods. Nothing outside this module
//! needs to know which task does what.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::adapters::time::Clock;
use crate::bus::{SharedBus, read_with_retry};
use crate::calibration::{CalibrationState, CalibrationStatus, SweepContext, run_sweep};
use crate::classify::{ClassifierContext, CounterSample, EventCounters, run_classifier};
use crate::config::{CalibrationTuning, TunableSettings};
use crate::error::{Error, Result, StorageError};
use crate::eventbus::{EventBus, OutboundEvent};
use crate::irq;
use crate::ports::StoragePort;
use crate::registers::{
    self, AFE_GAIN, CLEAR_STATS, DIRECT_COMMAND, MASK_DISTURBER, MIN_STRIKES, NOISE_FLOOR,
    REG_CALIB_RCO, REG_PRESET_DEFAULT, SPIKE_REJECTION, WATCHDOG,
};
use crate::snapshot::{ConfigSnapshot, SNAPSHOT_NAMESPACE};
use crate::tasks::{Core, spawn_on_core};
use crate::validate::{ValidationOutcome, ValidationParams, run_validation};

/// NVS key holding the persisted tunables blob.
const TUNABLES_KEY: &str = "tunables";

type SharedStorage = Arc<Mutex<Box<dyn StoragePort + Send>>>;

pub struct MonitorService {
    bus: Arc<SharedBus>,
    counters: Arc<EventCounters>,
    events: Arc<EventBus>,
    /// Classifier feeds the counters while set (calibration/validation).
    counting: Arc<AtomicBool>,
    calibration: Arc<Mutex<CalibrationStatus>>,
    cancel: Arc<AtomicBool>,
    storage: SharedStorage,
    clock: Arc<dyn Clock>,
    tuning: CalibrationTuning,
    running: Arc<AtomicBool>,
}

impl MonitorService {
    pub fn new(
        bus: SharedBus,
        storage: Box<dyn StoragePort + Send>,
        clock: Arc<dyn Clock>,
        tuning: CalibrationTuning,
    ) -> Self {
        Self {
            bus: Arc::new(bus),
            counters: Arc::new(EventCounters::new()),
            events: Arc::new(EventBus::new()),
            counting: Arc::new(AtomicBool::new(false)),
            calibration: Arc::new(Mutex::new(CalibrationStatus::default())),
            cancel: Arc::new(AtomicBool::new(false)),
            storage: Arc::new(Mutex::new(storage)),
            clock,
            tuning,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Bring-up ──────────────────────────────────────────────

    /// Reset the sensor to datasheet defaults, recalibrate its internal
    /// oscillators, and apply the given tunables.
    pub fn bring_up(&self, settings: &TunableSettings) -> Result<()> {
        settings.validate()?;

        self.bus.write(REG_PRESET_DEFAULT, DIRECT_COMMAND)?;
        self.clock.sleep_ms(registers::POWER_UP_DELAY_MS);
        self.bus.write(REG_CALIB_RCO, DIRECT_COMMAND)?;
        self.clock.sleep_ms(registers::INTERRUPT_SETTLE_MS);

        self.apply_settings(settings)?;
        self.clear_statistics()?;
        irq::drain();
        info!("sensor bring-up complete");
        Ok(())
    }

    /// Write every tunable field under a single guard acquisition.
    pub fn apply_settings(&self, settings: &TunableSettings) -> Result<()> {
        settings.validate()?;
        let retry = self.bus.retry_policy();
        let fields = [
            (AFE_GAIN, settings.afe_gain),
            (NOISE_FLOOR, settings.noise_level),
            (SPIKE_REJECTION, settings.spike_rejection),
            // validate() guarantees the encoding exists
            (
                MIN_STRIKES,
                registers::min_strikes_code(settings.min_strikes).unwrap_or(0),
            ),
            (MASK_DISTURBER, u8::from(!settings.disturber_enabled)),
            (WATCHDOG, settings.watchdog_threshold),
        ];
        self.bus.with_guard(|raw| {
            for (field, value) in fields {
                let current = read_with_retry(raw, field.addr, retry)?;
                let merged = field.merge(current, value) & registers::writable_mask(field.addr);
                raw.write_register(field.addr, merged)?;
            }
            Ok(())
        })
    }

    /// Toggle the clear-statistics bit high-low-high.
    pub fn clear_statistics(&self) -> Result<()> {
        let retry = self.bus.retry_policy();
        self.bus.with_guard(|raw| {
            let current = read_with_retry(raw, CLEAR_STATS.addr, retry)?;
            for value in [1u8, 0, 1] {
                raw.write_register(CLEAR_STATS.addr, CLEAR_STATS.merge(current, value))?;
            }
            Ok(())
        })
    }

    // ── Raw register maps ─────────────────────────────────────

    /// Apply `addr → value` pairs in iteration order. Every address is
    /// validated before the first write; duplicates are applied in order,
    /// so the last write for an address wins on the wire.
    pub fn apply_register_map(&self, entries: &[(u8, u8)]) -> Result<()> {
        for &(addr, _) in entries {
            registers::check_register(addr)?;
        }
        self.bus.with_guard(|raw| {
            for &(addr, value) in entries {
                raw.write_register(addr, value & registers::writable_mask(addr))?;
            }
            Ok(())
        })
    }

    /// Read the given registers under one guard acquisition.
    pub fn read_register_map(&self, addrs: &[u8]) -> Result<Vec<(u8, u8)>> {
        for &addr in addrs {
            registers::check_register(addr)?;
        }
        let retry = self.bus.retry_policy();
        self.bus.with_guard(|raw| {
            let mut out = Vec::with_capacity(addrs.len());
            for &addr in addrs {
                out.push((addr, read_with_retry(raw, addr, retry)?));
            }
            Ok(out)
        })
    }

    // ── Classifier lifecycle ──────────────────────────────────

    /// Spawn the classifier task. Idempotent: a second call while running
    /// is a no-op.
    pub fn start_classifier(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::AcqRel) {
            return None;
        }
        let ctx = ClassifierContext {
            bus: Arc::clone(&self.bus),
            counters: Arc::clone(&self.counters),
            events: Arc::clone(&self.events),
            counting: Arc::clone(&self.counting),
            spurious_energy_max: self.tuning.spurious_energy_max,
        };
        let running = Arc::clone(&self.running);
        Some(spawn_on_core(Core::App, 10, 8, "classifier\0", move || {
            run_classifier(&ctx, running.as_ref());
            info!("classifier task exited");
        }))
    }

    /// Ask the classifier task to exit after its current iteration.
    pub fn stop_classifier(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Subscribe to outbound events with a bounded queue.
    pub fn register_event_listener(
        &self,
        capacity: usize,
    ) -> std::sync::mpsc::Receiver<OutboundEvent> {
        self.events.subscribe(capacity)
    }

    // ── Calibration ───────────────────────────────────────────

    /// Start a calibration sweep in its own task.
    ///
    /// Fails with [`Error::CalibrationBusy`] if a sweep is running.
    pub fn start_calibration(&self) -> Result<JoinHandle<()>> {
        {
            let mut status = self.calibration.lock().unwrap_or_else(|p| p.into_inner());
            if !status.state.can_start() {
                return Err(Error::CalibrationBusy);
            }
            // Claim the Running state under the lock so two callers
            // cannot both pass the check.
            status.state = CalibrationState::Running;
        }

        let bus = Arc::clone(&self.bus);
        let counters = Arc::clone(&self.counters);
        let status = Arc::clone(&self.calibration);
        let cancel = Arc::clone(&self.cancel);
        let counting = Arc::clone(&self.counting);
        let clock = Arc::clone(&self.clock);
        let tuning = self.tuning;

        Ok(spawn_on_core(Core::App, 5, 8, "calibrate\0", move || {
            let ctx = SweepContext {
                bus: &bus,
                counters: &counters,
                status: &status,
                cancel: &cancel,
                counting: &counting,
                tuning: &tuning,
                clock: clock.as_ref(),
            };
            if let Err(e) = run_sweep(&ctx) {
                error!("calibration sweep failed: {e}");
            }
        }))
    }

    /// Request cancellation of a running sweep. Takes effect at the next
    /// window boundary; the last applied candidate stays in place.
    pub fn cancel_calibration(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Snapshot of the current (or last) sweep's progress.
    pub fn calibration_status(&self) -> CalibrationStatus {
        self.calibration
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    // ── Validated apply ───────────────────────────────────────

    /// Observe the sensor for the 5 s baseline reference window.
    pub fn measure_baseline(&self) -> CounterSample {
        let _ = self.counters.take();
        self.counting.store(true, Ordering::Release);
        self.clock
            .sleep_ms(crate::validate::BASELINE_REFERENCE_SECS as u32 * 1_000);
        self.counting.store(false, Ordering::Release);
        self.counters.take()
    }

    /// Snapshot, persist, apply, then validate in a background task.
    ///
    /// The snapshot must be durably stored before anything is written to
    /// the sensor; a storage failure blocks the apply entirely. The
    /// returned handle resolves to the validation outcome.
    ///
    /// Rejected with [`Error::CalibrationBusy`] while a sweep is running:
    /// both drive the same counters and counting flag, and a validation
    /// window would steal the sweep's samples.
    pub fn apply_and_validate(
        &self,
        settings: TunableSettings,
        params: ValidationParams,
    ) -> Result<JoinHandle<Result<ValidationOutcome>>> {
        settings.validate()?;
        {
            let status = self.calibration.lock().unwrap_or_else(|p| p.into_inner());
            if status.state == CalibrationState::Running {
                return Err(Error::CalibrationBusy);
            }
        }

        let snapshot = ConfigSnapshot::capture(&self.bus)?;
        {
            let mut storage = self.storage.lock().unwrap_or_else(|p| p.into_inner());
            snapshot.persist(storage.as_mut())?;
        }

        if let Err(e) = self.apply_settings(&settings) {
            // Partially applied settings are worse than none; put the
            // captured state back before surfacing the failure.
            if let Err(restore_err) = snapshot.restore(&self.bus) {
                error!("restore after failed apply also failed: {restore_err}");
            }
            return Err(e);
        }

        let bus = Arc::clone(&self.bus);
        let counters = Arc::clone(&self.counters);
        let counting = Arc::clone(&self.counting);
        let clock = Arc::clone(&self.clock);
        let storage = Arc::clone(&self.storage);

        Ok(spawn_on_core(Core::App, 5, 8, "validate\0", move || {
            let outcome =
                run_validation(&bus, &counters, &snapshot, params, &counting, clock.as_ref())?;
            match outcome {
                ValidationOutcome::Passed { .. } => {
                    // Settings survived; make them the boot defaults.
                    if let Err(e) = persist_tunables(&storage, &settings) {
                        warn!("tunables persist failed: {e}");
                    }
                }
                ValidationOutcome::RolledBack { .. } => {
                    info!("settings rolled back, persisted tunables unchanged");
                }
            }
            Ok(outcome)
        }))
    }

    /// Tunables persisted by the last successful validated apply.
    pub fn load_tunables(&self) -> Result<TunableSettings> {
        let storage = self.storage.lock().unwrap_or_else(|p| p.into_inner());
        let mut buf = [0u8; 64];
        let len = storage.read(SNAPSHOT_NAMESPACE, TUNABLES_KEY, &mut buf)?;
        let settings: TunableSettings =
            postcard::from_bytes(&buf[..len]).map_err(|_| StorageError::Corrupted)?;
        settings.validate()?;
        Ok(settings)
    }
}

fn persist_tunables(storage: &SharedStorage, settings: &TunableSettings) -> Result<()> {
    let bytes = postcard::to_allocvec(settings).map_err(|_| StorageError::IoError)?;
    let mut storage = storage.lock().unwrap_or_else(|p| p.into_inner());
    storage.write(SNAPSHOT_NAMESPACE, TUNABLES_KEY, &bytes)?;
    Ok(())
}

#[cfg(test)]
impl MonitorService {
    /// Test hook: the shared counters, for injecting classified events.
    pub(crate) fn counters_handle(&self) -> Arc<EventCounters> {
        Arc::clone(&self.counters)
    }
}
