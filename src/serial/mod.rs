//! # Serial Module
//!
//! Owns the sensor's serial link: device discovery, line framing and the
//! reopen loop.

pub mod lines;
pub mod port;
pub mod supervisor;

pub use lines::LineReader;
pub use port::{DeviceSelection, PortSettings};
pub use supervisor::{PortOpener, RetryPolicy, SerialOpener, supervise};
