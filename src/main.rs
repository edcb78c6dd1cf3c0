//! Stormwatch Firmware — Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  I2cRegisterBus / SpiRegisterBus   NvsAdapter   MonotonicClock │
//! │  (RegisterBus)                     (Config+NVS) (Clock)        │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            MonitorService (core logic)                 │    │
//! │  │  classifier · calibration · validation · snapshots     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  GPIO ISR ──▶ irq queue ──▶ classifier task ──▶ event bus      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use esp_idf_hal::gpio::{AnyIOPin, InterruptType, PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::{SpiDeviceDriver, config::Config as SpiConfig, config::Mode, config::Phase, config::Polarity};
use esp_idf_hal::units::FromValueType;

use stormwatch::adapters::nvs::NvsAdapter;
use stormwatch::adapters::time::MonotonicClock;
use stormwatch::bus::{RegisterBus, RetryPolicy, SharedBus, SpiRegisterBus};
use stormwatch::config::{BusKind, MonitorConfig};
use stormwatch::ports::ConfigPort;
use stormwatch::service::MonitorService;
use stormwatch::{bus, irq};

// VSPI wiring used when the sensor is strapped for SPI.
const SPI_SCLK: i32 = 18;
const SPI_MISO: i32 = 19;
const SPI_MOSI: i32 = 23;
const SPI_CS: i32 = 5;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Stormwatch v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
    let config = nvs.load().unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        MonitorConfig::default()
    });
    config.validate().map_err(|e| anyhow!("config invalid: {e}"))?;

    // ── 3. Bring up the register bus ──────────────────────────
    let peripherals = Peripherals::take().context("peripherals already taken")?;

    let raw_bus: Box<dyn RegisterBus + Send> = match config.bus {
        BusKind::I2c { address } => {
            // SAFETY: pin numbers come from validated config; each GPIO is
            // claimed exactly once, here.
            let sda = unsafe { AnyIOPin::new(i32::from(config.sda_gpio)) };
            let scl = unsafe { AnyIOPin::new(i32::from(config.scl_gpio)) };
            Box::new(
                stormwatch::bus::i2c::esp::i2c_register_bus(peripherals.i2c0, sda, scl, address)
                    .map_err(|e| anyhow!("i2c init failed: {e}"))?,
            )
        }
        BusKind::Spi => {
            let spi_config = SpiConfig::new()
                .baudrate(1u32.MHz().into())
                .data_mode(Mode {
                    polarity: Polarity::IdleLow,
                    phase: Phase::CaptureOnSecondTransition,
                });
            let driver = SpiDeviceDriver::new_single(
                peripherals.spi3,
                unsafe { AnyIOPin::new(SPI_SCLK) },
                unsafe { AnyIOPin::new(SPI_MOSI) },
                Some(unsafe { AnyIOPin::new(SPI_MISO) }),
                Some(unsafe { AnyIOPin::new(SPI_CS) }),
                &esp_idf_hal::spi::config::DriverConfig::new(),
                &spi_config,
            )
            .context("spi init failed")?;
            Box::new(SpiRegisterBus::new(driver))
        }
    };

    let shared_bus = SharedBus::new(
        raw_bus,
        Duration::from_millis(u64::from(config.guard_timeout_ms)),
        RetryPolicy {
            max_attempts: config.bus_retry_attempts,
            delay: Duration::from_millis(u64::from(config.bus_retry_delay_ms)),
        },
    );

    // ── 4. Monitor service ────────────────────────────────────
    let clock = Arc::new(MonotonicClock::new());
    let service = Arc::new(MonitorService::new(
        shared_bus,
        Box::new(nvs),
        clock,
        config.calibration,
    ));

    // Tunables from the last successful validated apply win over the
    // static config.
    let tunables = service.load_tunables().unwrap_or(config.tunables);
    service
        .bring_up(&tunables)
        .map_err(|e| anyhow!("sensor bring-up failed: {e}"))?;

    // ── 5. IRQ line → lock-free queue ─────────────────────────
    let irq_gpio = config.irq_gpio;
    let mut irq_pin = PinDriver::input(unsafe { AnyIOPin::new(i32::from(irq_gpio)) })
        .context("irq pin init failed")?;
    irq_pin.set_pull(Pull::Down)?;
    irq_pin.set_interrupt_type(InterruptType::PosEdge)?;
    // SAFETY: the callback only touches the lock-free queue, which is
    // ISR-safe by construction.
    unsafe {
        irq_pin.subscribe(move || {
            let _ = irq::push_irq(irq_gpio);
        })?;
    }
    irq_pin.enable_interrupt()?;

    // ── 6. Classifier task + event consumption ────────────────
    let _classifier = service.start_classifier();
    let listener = service.register_event_listener(16);

    info!(
        "monitor running (irq gpio {}, guard timeout {} ms, tx timeout {} ms)",
        irq_gpio,
        config.guard_timeout_ms,
        bus::TRANSACTION_TIMEOUT_MS
    );

    loop {
        match listener.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => info!("event [{}]: {}", event.topic, event.payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
        // esp-idf auto-masks the GPIO interrupt after each delivery.
        irq_pin.enable_interrupt()?;

        let dropped = irq::dropped_count();
        if dropped > 0 && dropped % 100 == 0 {
            warn!("irq queue has dropped {dropped} notifications");
        }
    }

    Ok(())
}
