//! Device-communication layer for cloud-connected cleaning robots.
//!
//! This crate maintains a live, reconciled view of the robots on an
//! account, fed by two independent channels:
//! - the polled cloud directory (`roboclean-cloud`)
//! - a push broker secured with TLS client certificates
//!
//! ## Architecture
//!
//! - **DataPointCodec** ([`dps`], [`submessage`]): symbolic attribute ↔
//!   wire key tables for the two protocol variants, plus binary
//!   sub-message blobs
//! - **ProtocolVariantDetector** ([`variant`]): legacy vs. novel wire
//!   protocol per device, upgrade-only
//! - **SecureTransport** ([`transport`]): persistent broker connection,
//!   per-device topic fan-in, command envelopes
//! - **StateReconciler** ([`reconciler`]): single-writer merge of both
//!   channels into one record per serial
//! - **RobovacService** ([`service`]): caller-facing lifecycle and
//!   command surface

pub mod dps;
pub mod error;
pub mod reconciler;
pub mod service;
pub mod states;
pub mod submessage;
pub mod transport;
pub mod variant;

pub use dps::SymbolicKey;
pub use error::{DeviceError, DeviceResult};
pub use reconciler::{CommandSink, DeviceRecord, SourceChannel, StateReconciler};
pub use service::RobovacService;
pub use states::{CleanSpeed, ControlVerb, VacuumState, WorkMode, WorkStatus};
pub use submessage::SubMessageCodec;
pub use transport::{CommandEnvelope, PushMessage, SecureTransport, TopicKind};
pub use variant::ProtocolVariant;
