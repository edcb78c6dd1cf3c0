//! AS3935 register map.
//!
//! Addresses, bit-field descriptors, and decode helpers for the Franklin
//! lightning sensor. All multi-bit settings live inside shared registers, so
//! every write goes through a masked read-modify-write that preserves the
//! unrelated bits (see [`Field::merge`]).

use crate::error::BusError;

// ── Register addresses ────────────────────────────────────────

/// AFE gain + power-down.
pub const REG_AFE_GAIN: u8 = 0x00;
/// Noise floor level + watchdog threshold.
pub const REG_THRESHOLD: u8 = 0x01;
/// Spike rejection + minimum strikes + clear-statistics.
pub const REG_LIGHTNING: u8 = 0x02;
/// Interrupt flags + disturber mask + frequency division.
pub const REG_INT_MASK: u8 = 0x03;
/// Lightning energy, LSB.
pub const REG_ENERGY_LSB: u8 = 0x04;
/// Lightning energy, MSB.
pub const REG_ENERGY_MSB: u8 = 0x05;
/// Lightning energy, MMSB (upper 5 bits).
pub const REG_ENERGY_MMSB: u8 = 0x06;
/// Estimated storm distance.
pub const REG_DISTANCE: u8 = 0x07;
/// Antenna tuning capacitance + oscillator display.
pub const REG_TUN_CAP: u8 = 0x08;

/// Writing [`DIRECT_COMMAND`] here restores all registers to power-on defaults.
pub const REG_PRESET_DEFAULT: u8 = 0x3C;
/// Writing [`DIRECT_COMMAND`] here recalibrates the internal RC oscillators.
pub const REG_CALIB_RCO: u8 = 0x3D;
/// Magic byte recognised by the two command registers.
pub const DIRECT_COMMAND: u8 = 0x96;

/// Settling time between the IRQ line rising and the interrupt source
/// register being valid (datasheet minimum).
pub const INTERRUPT_SETTLE_MS: u32 = 2;
/// Boot time after power-up or preset-default before the device accepts
/// transactions.
pub const POWER_UP_DELAY_MS: u32 = 25;

// ── Bit fields ────────────────────────────────────────────────

/// A contiguous bit field inside one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub addr: u8,
    pub mask: u8,
    pub shift: u8,
}

impl Field {
    /// Merge `value` into `current`, leaving bits outside `mask` untouched.
    pub const fn merge(self, current: u8, value: u8) -> u8 {
        (current & !self.mask) | ((value << self.shift) & self.mask)
    }

    /// Extract this field's value from a raw register byte.
    pub const fn extract(self, raw: u8) -> u8 {
        (raw & self.mask) >> self.shift
    }

    /// Largest value the field can hold.
    pub const fn max_value(self) -> u8 {
        self.mask >> self.shift
    }
}

/// Analog front-end gain (0x00 bits 5:1). Indoor = 18, outdoor = 14.
pub const AFE_GAIN: Field = Field { addr: REG_AFE_GAIN, mask: 0x3E, shift: 1 };
/// Power-down flag (0x00 bit 0). 1 = powered down.
pub const POWER_DOWN: Field = Field { addr: REG_AFE_GAIN, mask: 0x01, shift: 0 };
/// Noise floor level (0x01 bits 6:4), 0 = most sensitive.
pub const NOISE_FLOOR: Field = Field { addr: REG_THRESHOLD, mask: 0x70, shift: 4 };
/// Watchdog threshold (0x01 bits 3:0), valid 0–10.
pub const WATCHDOG: Field = Field { addr: REG_THRESHOLD, mask: 0x0F, shift: 0 };
/// Spike rejection (0x02 bits 3:0), 0 = most sensitive.
pub const SPIKE_REJECTION: Field = Field { addr: REG_LIGHTNING, mask: 0x0F, shift: 0 };
/// Minimum number of strikes (0x02 bits 5:4), 2-bit encoded.
pub const MIN_STRIKES: Field = Field { addr: REG_LIGHTNING, mask: 0x30, shift: 4 };
/// Clear lightning statistics (0x02 bit 6), toggled high-low-high.
pub const CLEAR_STATS: Field = Field { addr: REG_LIGHTNING, mask: 0x40, shift: 6 };
/// Mask-disturber flag (0x03 bit 5). 0 = disturber events reported.
pub const MASK_DISTURBER: Field = Field { addr: REG_INT_MASK, mask: 0x20, shift: 5 };
/// Antenna frequency division ratio (0x03 bits 7:6).
pub const FREQ_DIVISION: Field = Field { addr: REG_INT_MASK, mask: 0xC0, shift: 6 };
/// Interrupt source (0x03 bits 3:0). Read after the settle delay.
pub const IRQ_SOURCE: Field = Field { addr: REG_INT_MASK, mask: 0x0F, shift: 0 };
/// Distance estimate (0x07 bits 5:0).
pub const DISTANCE: Field = Field { addr: REG_DISTANCE, mask: 0x3F, shift: 0 };
/// Internal tuning capacitors (0x08 bits 3:0), 0–120 pF in 8 pF steps.
pub const TUNING_CAP: Field = Field { addr: REG_TUN_CAP, mask: 0x0F, shift: 0 };

/// AFE gain settings for the two supported environments.
pub const AFE_INDOOR: u8 = 0b10010;
pub const AFE_OUTDOOR: u8 = 0b01110;

/// Writable bits per register. Writes zero out everything else so reserved
/// bits are never driven.
pub const fn writable_mask(addr: u8) -> u8 {
    match addr {
        REG_AFE_GAIN => 0x3F,
        REG_THRESHOLD => 0x7F,
        REG_LIGHTNING => 0x7F,
        REG_INT_MASK => 0xEF,
        REG_ENERGY_MMSB => 0x1F,
        _ => 0xFF,
    }
}

/// True for every register address the service accepts in a register map.
pub const fn is_known_register(addr: u8) -> bool {
    matches!(addr, 0x00..=0x08 | REG_PRESET_DEFAULT | REG_CALIB_RCO)
}

/// Validate an address for a raw register-map operation.
pub fn check_register(addr: u8) -> Result<(), BusError> {
    if is_known_register(addr) {
        Ok(())
    } else {
        Err(BusError::InvalidRegister(addr))
    }
}

// ── Interrupt source decode ───────────────────────────────────

/// Decoded interrupt source (0x03 bits 3:0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    /// Noise level too high (0b0001).
    Noise,
    /// Disturber detected (0b0100).
    Disturber,
    /// Lightning detected (0b1000).
    Lightning,
    /// Register read with no event pending, or distance-estimation update.
    None,
}

impl IrqSource {
    /// Decode the 4-bit interrupt field. Unknown combinations fold into
    /// `None` so a glitched read never produces a phantom strike.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0b0001 => Self::Noise,
            0b0100 => Self::Disturber,
            0b1000 => Self::Lightning,
            _ => Self::None,
        }
    }
}

// ── Distance decode ───────────────────────────────────────────

/// Storm distance estimate from register 0x07.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "km")]
pub enum DistanceEstimate {
    /// Storm directly overhead.
    Overhead,
    /// Estimated leading-edge distance in kilometres.
    Km(u8),
    /// Out of range (> 40 km) or no estimate available.
    OutOfRange,
}

/// Decode the 6-bit distance code. The device only reports the enumerated
/// values below; anything else is treated as out of range.
pub fn decode_distance(code: u8) -> DistanceEstimate {
    match code & 0x3F {
        0x01 => DistanceEstimate::Overhead,
        0x05 => DistanceEstimate::Km(5),
        0x06 => DistanceEstimate::Km(6),
        0x08 => DistanceEstimate::Km(8),
        0x0A => DistanceEstimate::Km(10),
        0x0C => DistanceEstimate::Km(12),
        0x0E => DistanceEstimate::Km(14),
        0x11 => DistanceEstimate::Km(17),
        0x14 => DistanceEstimate::Km(20),
        0x18 => DistanceEstimate::Km(24),
        0x1B => DistanceEstimate::Km(27),
        0x1F => DistanceEstimate::Km(31),
        0x22 => DistanceEstimate::Km(34),
        0x25 => DistanceEstimate::Km(37),
        0x28 => DistanceEstimate::Km(40),
        _ => DistanceEstimate::OutOfRange,
    }
}

/// Assemble the 21-bit lightning energy figure from its three registers.
pub fn decode_energy(lsb: u8, msb: u8, mmsb: u8) -> u32 {
    ((u32::from(mmsb) & 0x1F) << 16) | (u32::from(msb) << 8) | u32::from(lsb)
}

/// Encode a minimum-strikes count into the 2-bit register field.
///
/// Note: the 9-strike setting shares the encoding of the 5-strike setting
/// here. Whether the part accepts a distinct code for 9 is unconfirmed, so
/// the historic mapping is kept rather than silently corrected.
pub fn min_strikes_code(strikes: u8) -> Option<u8> {
    match strikes {
        1 => Some(0b00),
        5 | 9 => Some(0b01),
        16 => Some(0b11),
        _ => None,
    }
}
