//! Mock hardware for integration tests.
//!
//! `MockBus` is a scriptable AS3935 register file: tests poke interrupt
//! state and energy/distance registers into it, and it records every
//! physical write for ordering assertions. `MockStorage` is an in-memory
//! stand-in for the NVS partition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stormwatch::bus::RegisterBus;
use stormwatch::error::{BusError, StorageError};
use stormwatch::ports::StoragePort;
use stormwatch::registers::{
    REG_DISTANCE, REG_ENERGY_LSB, REG_ENERGY_MMSB, REG_ENERGY_MSB, REG_INT_MASK,
};

struct MockBusInner {
    regs: [u8; 0x40],
    writes: Vec<(u8, u8)>,
    nacks_remaining: u8,
}

impl Default for MockBusInner {
    fn default() -> Self {
        Self {
            regs: [0; 0x40],
            writes: Vec::new(),
            nacks_remaining: 0,
        }
    }
}

/// Cloneable handle to a shared register file.
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a pending lightning interrupt with the given distance code
    /// and 21-bit energy.
    pub fn script_lightning(&self, distance_code: u8, energy: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.regs[REG_INT_MASK as usize] = 0b0000_1000;
        inner.regs[REG_DISTANCE as usize] = distance_code & 0x3F;
        inner.regs[REG_ENERGY_LSB as usize] = (energy & 0xFF) as u8;
        inner.regs[REG_ENERGY_MSB as usize] = ((energy >> 8) & 0xFF) as u8;
        inner.regs[REG_ENERGY_MMSB as usize] = ((energy >> 16) & 0x1F) as u8;
    }

    /// Script a pending disturber interrupt.
    pub fn script_disturber(&self) {
        self.inner.lock().unwrap().regs[REG_INT_MASK as usize] = 0b0100;
    }

    /// Script the next `n` reads to NACK.
    pub fn script_nacks(&self, n: u8) {
        self.inner.lock().unwrap().nacks_remaining = n;
    }

    pub fn set_reg(&self, addr: u8, value: u8) {
        self.inner.lock().unwrap().regs[addr as usize] = value;
    }

    pub fn reg(&self, addr: u8) -> u8 {
        self.inner.lock().unwrap().regs[addr as usize]
    }

    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.inner.lock().unwrap().writes.clone()
    }
}

impl RegisterBus for MockBus {
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nacks_remaining > 0 {
            inner.nacks_remaining -= 1;
            return Err(BusError::Nack);
        }
        Ok(inner.regs[addr as usize])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap();
        inner.regs[addr as usize] = value;
        inner.writes.push((addr, value));
        Ok(())
    }
}

/// In-memory NVS stand-in.
#[derive(Default)]
pub struct MockStorage {
    map: HashMap<String, Vec<u8>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoragePort for MockStorage {
    fn read(&self, ns: &str, k: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.map.get(&format!("{}::{}", ns, k)) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, k: &str, d: &[u8]) -> Result<(), StorageError> {
        self.map.insert(format!("{}::{}", ns, k), d.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, k: &str) -> Result<(), StorageError> {
        self.map.remove(&format!("{}::{}", ns, k));
        Ok(())
    }

    fn exists(&self, ns: &str, k: &str) -> bool {
        self.map.contains_key(&format!("{}::{}", ns, k))
    }
}
