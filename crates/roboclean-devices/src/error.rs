//! Error type for device-layer operations.

use thiserror::Error;

use crate::dps::SymbolicKey;
use crate::variant::ProtocolVariant;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Error type for device-layer operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Command targeted a serial the reconciler has never seen.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Command issued while the push transport is not connected.
    #[error("push transport not established")]
    NoTransport,

    /// Broker-level failure (connect, subscribe, publish).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A sub-message blob could not be decoded. Non-fatal at the
    /// reconciliation level: the attribute keeps the raw blob.
    #[error("sub-message decode failure ({schema}): {reason}")]
    Decode { schema: String, reason: String },

    /// A structured command value could not be encoded.
    #[error("sub-message encode failure ({schema}): {reason}")]
    Encode { schema: String, reason: String },

    /// No such schema in the codec registry.
    #[error("unknown sub-message schema: {0}")]
    UnknownSchema(String),

    /// The symbolic key has no wire key under the device's variant.
    #[error("no wire key for {key} under {variant} protocol")]
    UnmappedKey {
        key: SymbolicKey,
        variant: ProtocolVariant,
    },

    /// No response arrived for a correlated command in time.
    #[error("command response timed out")]
    CommandTimeout,

    /// Failure from the cloud REST layer.
    #[error(transparent)]
    Cloud(#[from] roboclean_cloud::CloudError),

    /// Other error
    #[error("device layer error: {0}")]
    Other(#[from] anyhow::Error),
}
