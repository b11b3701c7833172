//! Event types emitted by the device-communication layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection state of the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Events published on the [`EventBus`](crate::EventBus).
///
/// Embedding applications subscribe to these to refresh their own entity
/// model; the device map itself is read through `snapshot()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobocleanEvent {
    /// A single device's record changed (merge from either channel).
    DeviceUpdated { serial: String },
    /// The overall device map changed shape (first sighting, online flips).
    SnapshotChanged,
    /// The push transport changed connection state.
    Transport { state: ConnectionState },
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id
    pub id: Uuid,
    /// Component that produced the event
    pub source: String,
    /// Wall-clock publish time
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}
