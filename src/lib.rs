//! Stormwatch firmware library.
//!
//! Monitors an AS3935 lightning sensor over I2C or SPI, classifies its
//! interrupts into semantic events, and adaptively tunes the sensitivity
//! registers with a snapshot/validate/rollback safety net.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod bus;
pub mod calibration;
pub mod classify;
pub mod config;
pub mod eventbus;
pub mod irq;
pub mod ports;
pub mod registers;
pub mod service;
pub mod snapshot;
pub mod tasks;
pub mod validate;

pub mod error;

pub use error::{Error, Result};
