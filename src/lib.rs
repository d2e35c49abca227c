//! # Gesture Relay
//!
//! Relays presence and gesture events from a serial sensor to WebSocket
//! display clients, and switches the display off when nobody is around.
//!
//! ## Architecture
//!
//! Lines flow from the sensor through the parser to two consumers:
//!
//! - [`serial`]: device discovery, line framing and the reopen loop
//! - [`event`]: the line parser and event types
//! - [`hub`]: fan-out to connected WebSocket clients
//! - [`power`]: debounced display power state machine
//! - [`relay`]: the per-line dispatch tying them together
//! - [`config`]: command-line configuration
//! - [`error`]: custom error types for the application

pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod power;
pub mod relay;
pub mod serial;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::{Args, RelayConfig};
    pub use crate::error::*;
    pub use crate::event::{Event, Presence};
    pub use crate::hub::{BroadcastHub, HubServer, WireFormat};
    pub use crate::power::{PowerController, ShellDisplayPower};
    pub use crate::relay::Relay;
    pub use crate::serial::{RetryPolicy, SerialOpener};
}
