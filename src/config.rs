//! System configuration parameters
//!
//! All tunable parameters for the Stormwatch monitor. Values can be
//! overridden via NVS; out-of-range values are rejected before persistence.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registers;

/// Which transport the sensor is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusKind {
    /// I2C with a 7-bit device address.
    I2c { address: u8 },
    /// SPI mode 1, dedicated chip select.
    Spi,
}

/// Sensor tunables that map directly onto device register fields.
///
/// These are the values calibration adjusts and validation protects; they
/// are persisted so the sensor comes back configured after a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunableSettings {
    /// Analog front-end gain (18 = indoor, 14 = outdoor).
    pub afe_gain: u8,
    /// Noise floor level, 0 (most sensitive) to 7.
    pub noise_level: u8,
    /// Spike rejection, 0 (most sensitive) to 15.
    pub spike_rejection: u8,
    /// Minimum strikes before a lightning interrupt: 1, 5, 9, or 16.
    pub min_strikes: u8,
    /// Report disturber events (false masks them in hardware).
    pub disturber_enabled: bool,
    /// Watchdog threshold, 0 to 10.
    pub watchdog_threshold: u8,
}

impl Default for TunableSettings {
    fn default() -> Self {
        Self {
            afe_gain: registers::AFE_INDOOR,
            noise_level: 2,
            spike_rejection: 2,
            min_strikes: 1,
            disturber_enabled: true,
            watchdog_threshold: 2,
        }
    }
}

impl TunableSettings {
    /// Range-check every field against the register map.
    pub fn validate(&self) -> Result<()> {
        if self.afe_gain != registers::AFE_INDOOR && self.afe_gain != registers::AFE_OUTDOOR {
            return Err(Error::Config("afe_gain must be 18 (indoor) or 14 (outdoor)"));
        }
        if self.noise_level > 7 {
            return Err(Error::Config("noise_level must be 0–7"));
        }
        if self.spike_rejection > 15 {
            return Err(Error::Config("spike_rejection must be 0–15"));
        }
        if registers::min_strikes_code(self.min_strikes).is_none() {
            return Err(Error::Config("min_strikes must be 1, 5, 9, or 16"));
        }
        if self.watchdog_threshold > 10 {
            return Err(Error::Config("watchdog_threshold must be 0–10"));
        }
        Ok(())
    }
}

/// Knobs for the calibration sweep and event classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTuning {
    /// Length of one sampling window in seconds.
    pub window_secs: u32,
    /// Windows sampled per candidate setting.
    pub windows_per_candidate: u32,
    /// A candidate wins when its spurious rate is at or below this
    /// (events per minute).
    pub target_spurious_per_min: f32,
    /// Lightning events below this energy count as spurious during counting.
    pub spurious_energy_max: u32,
}

impl Default for CalibrationTuning {
    fn default() -> Self {
        Self {
            window_secs: 5,
            windows_per_candidate: 3,
            target_spurious_per_min: 2.0,
            spurious_energy_max: 100,
        }
    }
}

/// Core monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    // --- Wiring ---
    /// Bus transport and addressing.
    pub bus: BusKind,
    /// GPIO carrying the sensor's IRQ line.
    pub irq_gpio: u8,
    /// I2C SDA GPIO (ignored for SPI).
    pub sda_gpio: u8,
    /// I2C SCL GPIO (ignored for SPI).
    pub scl_gpio: u8,

    // --- Sensor tunables ---
    pub tunables: TunableSettings,

    // --- Calibration ---
    pub calibration: CalibrationTuning,

    // --- Bus policy ---
    /// Read retry attempts on transient NACK.
    pub bus_retry_attempts: u8,
    /// Delay between retry attempts (milliseconds).
    pub bus_retry_delay_ms: u32,
    /// Bound on waiting for the register access guard (milliseconds).
    pub guard_timeout_ms: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::I2c { address: 0x03 },
            irq_gpio: 25,
            sda_gpio: 21,
            scl_gpio: 22,
            tunables: TunableSettings::default(),
            calibration: CalibrationTuning::default(),
            bus_retry_attempts: 5,
            bus_retry_delay_ms: 1,
            guard_timeout_ms: 5_000,
        }
    }
}

impl MonitorConfig {
    /// Range-check the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.tunables.validate()?;
        if let BusKind::I2c { address } = self.bus {
            if address > 0x7F {
                return Err(Error::Config("i2c address must fit 7 bits"));
            }
        }
        if self.bus_retry_attempts == 0 || self.bus_retry_attempts > 10 {
            return Err(Error::Config("bus_retry_attempts must be 1–10"));
        }
        if self.guard_timeout_ms == 0 {
            return Err(Error::Config("guard_timeout_ms must be non-zero"));
        }
        if self.calibration.window_secs == 0 {
            return Err(Error::Config("calibration window_secs must be non-zero"));
        }
        if self.calibration.windows_per_candidate == 0 {
            return Err(Error::Config("windows_per_candidate must be non-zero"));
        }
        if self.calibration.target_spurious_per_min < 0.0 {
            return Err(Error::Config("target_spurious_per_min must be >= 0"));
        }
        Ok(())
    }
}
