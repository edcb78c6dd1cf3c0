//! ISR-to-task interrupt bridge.
//!
//! The sensor raises its IRQ line when an event is pending; the GPIO ISR
//! must hand that off to the classifier task without blocking, allocating,
//! or touching the bus. A lock-free SPSC ring buffer of pin identifiers
//! does the handoff:
//!
//! ```text
//! ┌──────────┐     ┌───────────────┐     ┌────────────────┐
//! │ GPIO ISR │────▶│  IRQ queue    │────▶│  Classifier    │
//! │ (push)   │     │  (lock-free)  │     │  task (pop)    │
//! └──────────┘     └───────────────┘     └────────────────┘
//! ```
//!
//! A full queue drops the notification. That is acceptable: the interrupt
//! source register is level-style state, so the next edge re-delivers.

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Maximum number of pending IRQ notifications.
/// Power of 2 for efficient ring buffer modulo.
const IRQ_QUEUE_CAP: usize = 16;

static IRQ_HEAD: AtomicU8 = AtomicU8::new(0);
static IRQ_TAIL: AtomicU8 = AtomicU8::new(0);
/// Count of notifications dropped because the queue was full.
static IRQ_DROPPED: AtomicU32 = AtomicU32::new(0);
// SAFETY: IRQ_BUFFER is accessed exclusively through the SPSC discipline
// below. Producer (push_irq): GPIO ISR context — one writer. Consumer
// (pop_irq): classifier task — one reader. The acquire/release pairs on
// head and tail order the data accesses.
static mut IRQ_BUFFER: [u8; IRQ_QUEUE_CAP] = [0; IRQ_QUEUE_CAP];

/// Push an IRQ notification for `pin`.
/// Safe to call from ISR context (lock-free, no allocation).
/// Returns `false` if the queue is full (notification dropped).
pub fn push_irq(pin: u8) -> bool {
    let head = IRQ_HEAD.load(Ordering::Relaxed);
    let tail = IRQ_TAIL.load(Ordering::Acquire);
    let next_head = (head + 1) % IRQ_QUEUE_CAP as u8;

    if next_head == tail {
        IRQ_DROPPED.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    // SAFETY: single producer; the slot at `head` is not visible to the
    // consumer until the Release store below.
    unsafe {
        IRQ_BUFFER[head as usize] = pin;
    }

    IRQ_HEAD.store(next_head, Ordering::Release);
    true
}

/// Pop the next pending notification.
/// Called from the classifier task (single consumer).
pub fn pop_irq() -> Option<u8> {
    let tail = IRQ_TAIL.load(Ordering::Relaxed);
    let head = IRQ_HEAD.load(Ordering::Acquire);

    if tail == head {
        return None;
    }

    let pin = unsafe { IRQ_BUFFER[tail as usize] };
    IRQ_TAIL.store((tail + 1) % IRQ_QUEUE_CAP as u8, Ordering::Release);
    Some(pin)
}

/// Number of pending notifications.
pub fn queue_len() -> usize {
    let head = IRQ_HEAD.load(Ordering::Relaxed) as usize;
    let tail = IRQ_TAIL.load(Ordering::Relaxed) as usize;
    (head + IRQ_QUEUE_CAP - tail) % IRQ_QUEUE_CAP
}

/// Notifications dropped so far due to a full queue.
pub fn dropped_count() -> u32 {
    IRQ_DROPPED.load(Ordering::Relaxed)
}

/// Drain everything, for tests and shutdown paths.
pub fn drain() {
    while pop_irq().is_some() {}
}
