//! End-to-end monitor behaviour over the mock bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stormwatch::adapters::time::MonotonicClock;
use stormwatch::bus::{RetryPolicy, SharedBus};
use stormwatch::classify::{self, EventCounters, SensorEvent};
use stormwatch::config::CalibrationTuning;
use stormwatch::irq;
use stormwatch::registers::{DistanceEstimate, NOISE_FLOOR, WATCHDOG};
use stormwatch::service::MonitorService;
use stormwatch::validate::{ValidationOutcome, ValidationParams};

use crate::mock_hw::{MockBus, MockStorage};

fn shared_bus(mock: &MockBus) -> SharedBus {
    SharedBus::new(
        Box::new(mock.clone()),
        Duration::from_millis(500),
        RetryPolicy::default(),
    )
}

fn service(mock: &MockBus) -> MonitorService {
    MonitorService::new(
        shared_bus(mock),
        Box::new(MockStorage::new()),
        Arc::new(MonotonicClock::new()),
        CalibrationTuning {
            window_secs: 1,
            windows_per_candidate: 1,
            target_spurious_per_min: 2.0,
            spurious_energy_max: 100,
        },
    )
}

#[test]
fn irq_to_event_listener_end_to_end() {
    let mock = MockBus::new();
    mock.script_lightning(0x0A, 0x1234); // 10 km

    let svc = service(&mock);
    let listener = svc.register_event_listener(8);
    let handle = svc.start_classifier().expect("first start spawns");
    assert!(svc.start_classifier().is_none(), "second start is a no-op");

    irq::push_irq(25);

    let event = listener
        .recv_timeout(Duration::from_secs(2))
        .expect("classified event arrives");
    assert_eq!(event.topic, "lightning");
    assert!(event.payload.contains("\"energy\":4660"));
    assert!(event.payload.contains("\"km\":10"));

    svc.stop_classifier();
    handle.join().unwrap();
}

#[test]
fn classification_survives_transient_nacks() {
    let mock = MockBus::new();
    mock.script_disturber();
    mock.script_nacks(3); // fewer than the retry budget

    let bus = shared_bus(&mock);
    let report = classify::classify_once(&bus).unwrap();
    assert_eq!(report.event, SensorEvent::Disturber);
}

#[test]
fn concurrent_classification_loses_no_counts() {
    let counters = Arc::new(EventCounters::new());
    let total_taken = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));

    // A drainer that races take() against concurrent record() calls.
    let drainer = {
        let counters = Arc::clone(&counters);
        let total = Arc::clone(&total_taken);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let sample = counters.take();
                total.fetch_add(sample.spurious + sample.lightning, Ordering::Relaxed);
            }
        })
    };

    const PER_THREAD: u32 = 10_000;
    let recorders: Vec<_> = (0..4)
        .map(|i| {
            let counters = Arc::clone(&counters);
            std::thread::spawn(move || {
                for n in 0..PER_THREAD {
                    let energy = if (n + i) % 2 == 0 { 10 } else { 10_000 };
                    counters.record(
                        SensorEvent::Lightning {
                            distance: DistanceEstimate::Km(10),
                            energy,
                        },
                        100,
                    );
                }
            })
        })
        .collect();

    for r in recorders {
        r.join().unwrap();
    }
    done.store(true, Ordering::Release);
    drainer.join().unwrap();

    let leftover = counters.take();
    let total = total_taken.load(Ordering::Relaxed) + leftover.spurious + leftover.lightning;
    assert_eq!(total, 4 * PER_THREAD, "every record lands in exactly one sample");
}

#[test]
fn guard_serialises_read_modify_writes() {
    let mock = MockBus::new();
    let bus = Arc::new(shared_bus(&mock));

    // Two threads hammer different fields of the same register. If the
    // guard failed to serialise the read-modify-write pairs, one field's
    // update could clobber the other's.
    let a = {
        let bus = Arc::clone(&bus);
        std::thread::spawn(move || {
            for _ in 0..500 {
                bus.update_field(NOISE_FLOOR, 5).unwrap();
            }
        })
    };
    let b = {
        let bus = Arc::clone(&bus);
        std::thread::spawn(move || {
            for _ in 0..500 {
                bus.update_field(WATCHDOG, 9).unwrap();
            }
        })
    };
    a.join().unwrap();
    b.join().unwrap();

    assert_eq!(bus.read_field(NOISE_FLOOR).unwrap(), 5);
    assert_eq!(bus.read_field(WATCHDOG).unwrap(), 9);
}

#[test]
fn validated_apply_passes_on_quiet_sensor() {
    let mock = MockBus::new();
    let svc = service(&mock);

    let handle = svc
        .apply_and_validate(
            Default::default(),
            ValidationParams {
                baseline_spurious: 5,
                baseline_lightning: 0,
                duration_s: 1,
            },
        )
        .unwrap();
    let outcome = handle.join().unwrap().unwrap();
    assert!(matches!(outcome, ValidationOutcome::Passed { .. }));

    // The passing settings became the persisted boot tunables.
    assert_eq!(svc.load_tunables().unwrap(), Default::default());
}
