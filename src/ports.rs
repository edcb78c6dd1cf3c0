//! Port traits — the boundary between the monitor core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ core (snapshot store, config, service)
//! ```
//!
//! Driven adapters (NVS, in-memory test store) implement these traits; the
//! core consumes them via trait objects, so it never touches ESP-IDF APIs
//! directly and every piece is testable on the host.

use crate::config::MonitorConfig;
use crate::error::StorageError;

/// Persistent key-value blob storage (NVS on target).
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic — no partial blobs on power loss.
///   ESP-IDF NVS guarantees this natively; the in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Loads and persists the monitor configuration.
///
/// Implementations MUST validate before persisting. Invalid ranges are
/// rejected, not silently clamped — a bad value written once would
/// otherwise come back on every boot.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`MonitorConfig::default()`] if no stored config exists.
    fn load(&self) -> crate::error::Result<MonitorConfig>;

    /// Validate and persist configuration.
    fn save(&self, config: &MonitorConfig) -> crate::error::Result<()>;
}
