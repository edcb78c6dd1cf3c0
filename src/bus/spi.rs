//! SPI transport for the register bus.
//!
//! The sensor speaks SPI mode 1 with a two-byte frame: the first byte is
//! the register address with the operation encoded in its top bits
//! (`01` = read, `00` = write), the second carries the data.

use embedded_hal::spi::SpiDevice;

use super::RegisterBus;
use crate::error::BusError;
use crate::registers;

const OP_READ: u8 = 0x40;
const ADDR_MASK: u8 = 0x3F;

pub struct SpiRegisterBus<S> {
    spi: S,
}

impl<S: SpiDevice> SpiRegisterBus<S> {
    pub fn new(spi: S) -> Self {
        Self { spi }
    }
}

impl<S: SpiDevice> RegisterBus for SpiRegisterBus<S> {
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError> {
        registers::check_register(addr)?;
        let tx = [(addr & ADDR_MASK) | OP_READ, 0x00];
        let mut rx = [0u8; 2];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|_| BusError::TransferFailed)?;
        Ok(rx[1])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        registers::check_register(addr)?;
        self.spi
            .write(&[addr & ADDR_MASK, value])
            .map_err(|_| BusError::TransferFailed)?;
        Ok(())
    }
}
