//! Unified error types for the Stormwatch firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! top-level task loops' error handling uniform. All variants are `Copy` so
//! they can be cheaply passed between tasks without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bus transaction failed after exhausting its retry budget.
    Bus(BusError),
    /// The register access guard could not be acquired within its wait bound.
    GuardTimeout,
    /// Persistent storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// A calibration sweep is already running.
    CalibrationBusy,
    /// Restoring a register snapshot failed for `failed` of its entries.
    /// The remaining entries were still written.
    PartialRestore { failed: u8 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::GuardTimeout => write!(f, "register guard acquire timed out"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::CalibrationBusy => write!(f, "calibration already running"),
            Self::PartialRestore { failed } => {
                write!(f, "snapshot restore incomplete: {failed} register(s) failed")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

/// Transport-level failures from the register bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The device did not acknowledge (transient NACK after retries).
    Nack,
    /// The transaction did not complete within the transport timeout.
    Timeout,
    /// The controller reported an unrecoverable transfer fault.
    TransferFailed,
    /// The register address is not part of the device map.
    InvalidRegister(u8),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => write!(f, "device NACK"),
            Self::Timeout => write!(f, "transaction timeout"),
            Self::TransferFailed => write!(f, "transfer failed"),
            Self::InvalidRegister(addr) => write!(f, "invalid register 0x{addr:02X}"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Failures from the persistent key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Stored blob failed deserialisation.
    Corrupted,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::Corrupted => write!(f, "blob corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
