//! Event classification.
//!
//! The classifier task is the single consumer of the IRQ queue. For every
//! notification it waits out the datasheet settle delay, then reads the
//! interrupt source register and decodes what the sensor saw. Lightning
//! events additionally carry the distance estimate and the 21-bit energy
//! figure, read under the same guard acquisition so no other transaction
//! can slip between them.
//!
//! While a calibration sweep or validation run is counting, every
//! classified event also increments [`EventCounters`]. The counters are
//! atomics with swap-based read-and-clear, so a sampling window never
//! loses an increment that races with its readout.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::bus::{SharedBus, read_with_retry};
use crate::error::Result;
use crate::eventbus::EventBus;
use crate::irq;
use crate::registers::{
    self, DistanceEstimate, IrqSource, REG_AFE_GAIN, REG_DISTANCE, REG_ENERGY_LSB, REG_ENERGY_MMSB,
    REG_ENERGY_MSB, REG_INT_MASK, REG_THRESHOLD, REG_TUN_CAP,
};

/// A classified sensor event. Not retained anywhere; consumers that want
/// history keep their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SensorEvent {
    /// A (probable) strike, with distance estimate and raw energy figure.
    Lightning {
        distance: DistanceEstimate,
        energy: u32,
    },
    /// Man-made impulse rejected by the algorithm.
    Disturber,
    /// Ambient noise floor too high for acquisition.
    Noise,
    /// Interrupt with no decodable source (e.g. distance re-estimation).
    None,
}

/// Raw tunable-register snapshot carried alongside each event so outer
/// consumers can log the exact sensor state that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawRegs {
    pub afe: u8,
    pub threshold: u8,
    pub int_mask: u8,
    pub tun_cap: u8,
}

/// One classified event plus the register state behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventReport {
    #[serde(flatten)]
    pub event: SensorEvent,
    pub regs: RawRegs,
}

// ── Counters ──────────────────────────────────────────────────

/// Sample returned by [`EventCounters::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSample {
    pub spurious: u32,
    pub lightning: u32,
}

/// Atomic event tallies for calibration and validation windows.
#[derive(Debug, Default)]
pub struct EventCounters {
    spurious: AtomicU32,
    lightning: AtomicU32,
}

impl EventCounters {
    pub const fn new() -> Self {
        Self {
            spurious: AtomicU32::new(0),
            lightning: AtomicU32::new(0),
        }
    }

    /// Classify `event` into the tallies. Noise and disturber interrupts
    /// are spurious by definition; lightning interrupts whose energy sits
    /// below `spurious_energy_max` are counted as spurious too.
    pub fn record(&self, event: SensorEvent, spurious_energy_max: u32) {
        match event {
            SensorEvent::Noise | SensorEvent::Disturber => {
                self.spurious.fetch_add(1, Ordering::Relaxed);
            }
            SensorEvent::Lightning { energy, .. } => {
                if energy < spurious_energy_max {
                    self.spurious.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.lightning.fetch_add(1, Ordering::Relaxed);
                }
            }
            SensorEvent::None => {}
        }
    }

    /// Atomically read and clear both tallies. A concurrent `record` lands
    /// either in this sample or the next, never nowhere.
    pub fn take(&self) -> CounterSample {
        CounterSample {
            spurious: self.spurious.swap(0, Ordering::AcqRel),
            lightning: self.lightning.swap(0, Ordering::AcqRel),
        }
    }

    /// Read without clearing.
    pub fn peek(&self) -> CounterSample {
        CounterSample {
            spurious: self.spurious.load(Ordering::Acquire),
            lightning: self.lightning.load(Ordering::Acquire),
        }
    }
}

// ── Classification ────────────────────────────────────────────

/// Read and decode one pending interrupt under a single guard acquisition.
pub fn classify_once(bus: &SharedBus) -> Result<EventReport> {
    let retry = bus.retry_policy();
    bus.with_guard(|raw| {
        let int_mask = read_with_retry(raw, REG_INT_MASK, retry)?;
        let source = IrqSource::from_bits(registers::IRQ_SOURCE.extract(int_mask));

        let event = match source {
            IrqSource::Lightning => {
                let dist_raw = read_with_retry(raw, REG_DISTANCE, retry)?;
                let lsb = read_with_retry(raw, REG_ENERGY_LSB, retry)?;
                let msb = read_with_retry(raw, REG_ENERGY_MSB, retry)?;
                let mmsb = read_with_retry(raw, REG_ENERGY_MMSB, retry)?;
                SensorEvent::Lightning {
                    distance: registers::decode_distance(registers::DISTANCE.extract(dist_raw)),
                    energy: registers::decode_energy(lsb, msb, mmsb),
                }
            }
            IrqSource::Disturber => SensorEvent::Disturber,
            IrqSource::Noise => SensorEvent::Noise,
            IrqSource::None => SensorEvent::None,
        };

        let regs = RawRegs {
            afe: read_with_retry(raw, REG_AFE_GAIN, retry)?,
            threshold: read_with_retry(raw, REG_THRESHOLD, retry)?,
            int_mask,
            tun_cap: read_with_retry(raw, REG_TUN_CAP, retry)?,
        };

        Ok(EventReport { event, regs })
    })
}

// ── Classifier task ───────────────────────────────────────────

/// Shared pieces the classifier task needs.
pub struct ClassifierContext {
    pub bus: Arc<SharedBus>,
    pub counters: Arc<EventCounters>,
    pub events: Arc<EventBus>,
    /// Set while a calibration sweep or validation run wants tallies.
    pub counting: Arc<AtomicBool>,
    /// Energy ceiling below which a lightning interrupt is spurious.
    pub spurious_energy_max: u32,
}

/// Classifier task body. Polls the IRQ queue; runs until `running` clears.
///
/// No error terminates the loop: a failed transaction is logged and the
/// notification is consumed, since the next edge re-delivers.
pub fn run_classifier(ctx: &ClassifierContext, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        let Some(pin) = irq::pop_irq() else {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };

        // The interrupt source register is not valid until the settle
        // delay after the IRQ edge.
        std::thread::sleep(Duration::from_millis(u64::from(registers::INTERRUPT_SETTLE_MS)));

        match classify_once(&ctx.bus) {
            Ok(report) => {
                debug!("irq pin {pin}: {:?}", report.event);
                if ctx.counting.load(Ordering::Acquire) {
                    ctx.counters.record(report.event, ctx.spurious_energy_max);
                }
                ctx.events.publish(&report);
            }
            Err(e) => warn!("classification failed: {e}"),
        }
    }
}
