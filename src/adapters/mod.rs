//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter | Implements           | Connects to             |
//! |---------|----------------------|-------------------------|
//! | `nvs`   | ConfigPort           | NVS / in-memory store   |
//! |         | StoragePort          |                         |
//! | `time`  | Clock                | ESP32 system timer      |

pub mod nvs;
pub mod time;
