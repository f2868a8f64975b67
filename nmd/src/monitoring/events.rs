//! Fan-out of device events to subscribers.
//!
//! Every worker holds a clone of the same [`EventSink`]. Emitting never
//! blocks; a subscriber that falls behind misses the oldest events and
//! sees a `Lagged` error from its receiver.

use log::debug;
use tokio::sync::broadcast;

use crate::api::models::DeviceEvent;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<DeviceEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventSink {
    pub(crate) fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        if self.tx.send(event).is_err() {
            debug!("Dropped device event: no subscribers");
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }
}
