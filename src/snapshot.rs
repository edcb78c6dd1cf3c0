//! Configuration snapshot store.
//!
//! Before any speculative settings change, the current tunable registers
//! are captured and written to NVS. If the change turns out worse (see
//! the validation supervisor) or the device browns out mid-experiment,
//! the snapshot is the rollback point.

use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

use crate::bus::{SharedBus, read_with_retry};
use crate::error::{Error, Result, StorageError};
use crate::ports::StoragePort;
use crate::registers::{
    REG_AFE_GAIN, REG_INT_MASK, REG_LIGHTNING, REG_THRESHOLD, REG_TUN_CAP, writable_mask,
};

/// NVS namespace for monitor state.
pub const SNAPSHOT_NAMESPACE: &str = "stormwatch";
/// Key holding the register backup blob.
pub const SNAPSHOT_KEY: &str = "regs_backup";

/// The registers worth backing up: everything calibration or a settings
/// apply can touch. Energy/distance registers are telemetry, not state.
pub const TUNABLE_REGS: [u8; 5] = [
    REG_AFE_GAIN,
    REG_THRESHOLD,
    REG_LIGHTNING,
    REG_INT_MASK,
    REG_TUN_CAP,
];

/// A point-in-time copy of the tunable registers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    entries: HVec<(u8, u8), 8>,
}

impl ConfigSnapshot {
    /// Read every tunable register under a single guard acquisition.
    pub fn capture(bus: &SharedBus) -> Result<Self> {
        let retry = bus.retry_policy();
        bus.with_guard(|raw| {
            let mut entries = HVec::new();
            for addr in TUNABLE_REGS {
                let value = read_with_retry(raw, addr, retry)?;
                // Capacity 8 > TUNABLE_REGS.len(), push cannot fail.
                let _ = entries.push((addr, value));
            }
            Ok(Self { entries })
        })
    }

    /// Re-apply every captured register.
    ///
    /// Keeps going past individual write failures so one bad transaction
    /// does not abandon the rest of the rollback, then surfaces how many
    /// entries could not be restored.
    pub fn restore(&self, bus: &SharedBus) -> Result<()> {
        let mut failed: u8 = 0;
        bus.with_guard(|raw| {
            for &(addr, value) in &self.entries {
                if raw
                    .write_register(addr, value & writable_mask(addr))
                    .is_err()
                {
                    failed += 1;
                }
            }
            Ok(())
        })?;
        if failed > 0 {
            return Err(Error::PartialRestore { failed });
        }
        Ok(())
    }

    /// The captured value for `addr`, if it is part of the snapshot.
    pub fn get(&self, addr: u8) -> Option<u8> {
        self.entries
            .iter()
            .find(|(a, _)| *a == addr)
            .map(|&(_, v)| v)
    }

    pub fn entries(&self) -> &[(u8, u8)] {
        &self.entries
    }

    /// Serialise and durably store the snapshot. Failure here must block
    /// whatever speculative change prompted the capture.
    pub fn persist(&self, storage: &mut dyn StoragePort) -> Result<()> {
        let bytes = postcard::to_allocvec(self).map_err(|_| StorageError::IoError)?;
        storage.write(SNAPSHOT_NAMESPACE, SNAPSHOT_KEY, &bytes)?;
        Ok(())
    }

    /// Load the last persisted snapshot.
    pub fn load(storage: &dyn StoragePort) -> Result<Self> {
        let mut buf = [0u8; 128];
        let len = storage.read(SNAPSHOT_NAMESPACE, SNAPSHOT_KEY, &mut buf)?;
        let snapshot =
            postcard::from_bytes(&buf[..len]).map_err(|_| StorageError::Corrupted)?;
        Ok(snapshot)
    }
}
