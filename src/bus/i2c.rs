//! I2C transport for the register bus.
//!
//! Generic over any `embedded-hal` 1.0 [`I2c`] bus, so the same code drives
//! the ESP-IDF peripheral on target and a mock register file in host tests.
//! Register reads are a write-then-read of the register address; the sensor
//! auto-increments, but we only ever move one byte at a time.

use embedded_hal::i2c::{ErrorKind, I2c};

use super::RegisterBus;
use crate::error::BusError;
use crate::registers;

pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }
}

fn map_i2c_err<E: embedded_hal::i2c::Error>(e: E) -> BusError {
    match e.kind() {
        ErrorKind::NoAcknowledge(_) => BusError::Nack,
        ErrorKind::ArbitrationLoss => BusError::TransferFailed,
        _ => BusError::TransferFailed,
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisterBus<I2C> {
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError> {
        registers::check_register(addr)?;
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[addr], &mut buf)
            .map_err(map_i2c_err)?;
        Ok(buf[0])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        registers::check_register(addr)?;
        self.i2c
            .write(self.address, &[addr, value])
            .map_err(map_i2c_err)?;
        Ok(())
    }
}

// ── ESP-IDF construction ──────────────────────────────────────

#[cfg(target_os = "espidf")]
pub mod esp {
    use esp_idf_hal::delay::TickType;
    use esp_idf_hal::gpio::AnyIOPin;
    use esp_idf_hal::i2c::{I2c as EspI2c, I2cConfig, I2cDriver};
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_hal::units::FromValueType;

    use super::I2cRegisterBus;
    use crate::bus::TRANSACTION_TIMEOUT_MS;
    use crate::error::{Error, Result};

    /// Bring up the I2C peripheral at the sensor's conservative 100 kHz.
    pub fn i2c_register_bus<'d>(
        i2c: impl Peripheral<P = impl EspI2c> + 'd,
        sda: AnyIOPin,
        scl: AnyIOPin,
        address: u8,
    ) -> Result<I2cRegisterBus<I2cDriver<'d>>> {
        let config = I2cConfig::new()
            .baudrate(100u32.kHz().into())
            .timeout(TickType::new_millis(u64::from(TRANSACTION_TIMEOUT_MS)).into());
        let driver = I2cDriver::new(i2c, sda, scl, &config)
            .map_err(|_| Error::Init("i2c driver init failed"))?;
        Ok(I2cRegisterBus::new(driver, address))
    }
}
