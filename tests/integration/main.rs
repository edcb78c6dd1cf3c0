//! Integration tests: monitor service over mock hardware.
//!
//! These run on the host against the in-memory bus and storage mocks;
//! nothing here touches ESP-IDF.

mod calibration_flow_tests;
mod mock_hw;
mod monitor_tests;
