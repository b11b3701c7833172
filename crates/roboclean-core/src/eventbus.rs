//! Event bus for the roboclean device layer.
//!
//! All components report through publishing on the bus; embedding
//! applications subscribe for snapshot-change notifications instead of
//! polling the device map.

use crate::event::{EventMetadata, RobocleanEvent};
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast event bus.
///
/// Uses a tokio broadcast channel so every subscriber sees every event.
/// Slow subscribers may drop old events; the device map is always
/// recoverable through `snapshot()`, so dropped notifications only delay
/// a refresh.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(RobocleanEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns `true` if at least one subscriber
    /// received it.
    pub fn publish(&self, event: RobocleanEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of an event-bus subscription.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(RobocleanEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event, waiting if none is queued.
    ///
    /// Returns `None` when the bus is closed or this receiver lagged past
    /// the channel capacity and was disconnected.
    pub async fn recv(&mut self) -> Option<(RobocleanEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(pair) => return Some(pair),
                // Lagged: skip to the oldest retained event.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<(RobocleanEvent, EventMetadata)> {
        loop {
            match self.rx.try_recv() {
                Ok(pair) => return Some(pair),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
