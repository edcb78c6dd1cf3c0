//! Register bus abstraction.
//!
//! Everything that touches the sensor goes through [`RegisterBus`]
//! (single-byte register reads and writes) behind [`SharedBus`], the
//! mutual-exclusion guard that totally orders transactions across the
//! classifier, calibration, and validation tasks.

pub mod i2c;
pub mod spi;

pub use i2c::I2cRegisterBus;
pub use spi::SpiRegisterBus;

use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use crate::error::{BusError, Error, Result};
use crate::registers;

/// Transport-level transaction timeout handed to the peripheral drivers.
pub const TRANSACTION_TIMEOUT_MS: u32 = 500;

/// Byte-register access to the sensor.
///
/// Implementations are transport-specific (I2C, SPI, test double) and must
/// reject addresses outside the device map.
pub trait RegisterBus {
    fn read_register(&mut self, addr: u8) -> core::result::Result<u8, BusError>;
    fn write_register(&mut self, addr: u8, value: u8) -> core::result::Result<(), BusError>;
}

/// Bounded retry for reads that are sensitive to transient NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u8,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        }
    }
}

/// Retried single-register read. Only NACKs are retried; other faults
/// surface immediately. Public so multi-register sequences can run under
/// a single [`SharedBus::with_guard`] scope.
pub fn read_with_retry(
    bus: &mut dyn RegisterBus,
    addr: u8,
    retry: RetryPolicy,
) -> core::result::Result<u8, BusError> {
    let mut attempt = 0;
    loop {
        match bus.read_register(addr) {
            Ok(v) => return Ok(v),
            Err(BusError::Nack) if attempt + 1 < retry.max_attempts => {
                attempt += 1;
                std::thread::sleep(retry.delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Mutual-exclusion wrapper around the register bus.
///
/// All register transactions in the firmware go through this type. The
/// guard is a closure scope, so it is released on every exit path,
/// including errors. Acquisition is bounded: a task that cannot get the
/// bus within `guard_timeout` gets [`Error::GuardTimeout`] instead of
/// blocking forever.
pub struct SharedBus {
    inner: Mutex<Box<dyn RegisterBus + Send>>,
    guard_timeout: Duration,
    retry: RetryPolicy,
}

impl SharedBus {
    pub fn new(bus: Box<dyn RegisterBus + Send>, guard_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(bus),
            guard_timeout,
            retry,
        }
    }

    /// Run `f` with exclusive bus access.
    ///
    /// Spins on `try_lock` with a short sleep rather than parking, so the
    /// timeout bound holds even under FreeRTOS priority inversion.
    pub fn with_guard<T>(&self, f: impl FnOnce(&mut dyn RegisterBus) -> Result<T>) -> Result<T> {
        let deadline = Instant::now() + self.guard_timeout;
        loop {
            match self.inner.try_lock() {
                Ok(mut bus) => return f(bus.as_mut()),
                Err(TryLockError::Poisoned(poisoned)) => {
                    // A panicking holder cannot leave the bus unusable;
                    // the hardware state is still coherent per-transaction.
                    let mut bus = poisoned.into_inner();
                    return f(bus.as_mut());
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(Error::GuardTimeout);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Read one register under the guard, retrying transient NACKs.
    pub fn read(&self, addr: u8) -> Result<u8> {
        let retry = self.retry;
        self.with_guard(|bus| Ok(read_with_retry(bus, addr, retry)?))
    }

    /// Write one register under the guard. Reserved bits are masked to
    /// zero so they are never driven.
    pub fn write(&self, addr: u8, value: u8) -> Result<()> {
        self.with_guard(|bus| Ok(bus.write_register(addr, value & registers::writable_mask(addr))?))
    }

    /// Masked read-modify-write of a single bit field.
    ///
    /// The read and the write happen under one guard acquisition, so no
    /// other task can interleave between them.
    pub fn update_field(&self, field: registers::Field, value: u8) -> Result<()> {
        let retry = self.retry;
        self.with_guard(|bus| {
            let current = read_with_retry(bus, field.addr, retry)?;
            let merged = field.merge(current, value) & registers::writable_mask(field.addr);
            bus.write_register(field.addr, merged)?;
            Ok(())
        })
    }

    /// Read one bit field.
    pub fn read_field(&self, field: registers::Field) -> Result<u8> {
        Ok(field.extract(self.read(field.addr)?))
    }

    /// The retry policy for callers composing their own guarded sequences.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
