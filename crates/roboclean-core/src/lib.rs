//! Shared foundation for the roboclean device-communication layer.
//!
//! This crate carries the pieces every other roboclean crate leans on:
//! - **EventBus**: broadcast channel distributing device-layer events to
//!   embedding applications
//! - **Config**: account credentials and tunable defaults for polling,
//!   command timeouts and reconciliation

pub mod config;
pub mod event;
pub mod eventbus;
pub mod logging;

pub use config::{AccountConfig, ServiceConfig};
pub use event::{ConnectionState, EventMetadata, RobocleanEvent};
pub use eventbus::{EventBus, EventBusReceiver};
pub use logging::init_tracing;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
