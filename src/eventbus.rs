//! Outbound event fan-out.
//!
//! Classified events leave the core through this bus. Delivery is
//! fire-and-forget over bounded per-consumer channels: a slow or dead
//! consumer loses its own events and nothing else — the classifier never
//! blocks on a subscriber. Transport glue (MQTT, SSE, serial console)
//! subscribes here and forwards the JSON payloads as-is.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use log::warn;

use crate::classify::{EventReport, SensorEvent};

/// One event as it leaves the core: a topic suffix plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    pub topic: &'static str,
    pub payload: String,
}

/// Fan-out hub for [`OutboundEvent`]s.
pub struct EventBus {
    senders: Mutex<Vec<SyncSender<OutboundEvent>>>,
    dropped: AtomicU32,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            dropped: AtomicU32::new(0),
        }
    }

    /// Subscribe with a bounded queue of `capacity` events.
    ///
    /// Dropping the receiver unsubscribes on the next publish.
    pub fn subscribe(&self, capacity: usize) -> Receiver<OutboundEvent> {
        let (tx, rx) = sync_channel(capacity.max(1));
        self.senders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    /// Publish a classified event to every live subscriber.
    pub fn publish(&self, report: &EventReport) {
        let topic = match report.event {
            SensorEvent::Lightning { .. } => "lightning",
            SensorEvent::Disturber => "disturber",
            SensorEvent::Noise => "noise",
            SensorEvent::None => "none",
        };
        let payload = match serde_json::to_string(report) {
            Ok(p) => p,
            Err(e) => {
                warn!("event serialisation failed: {e}");
                return;
            }
        };
        let event = OutboundEvent { topic, payload };

        let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Consumer is behind; its event is gone, the rest still see it.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Events dropped so far because a subscriber queue was full.
    pub fn dropped_count(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
