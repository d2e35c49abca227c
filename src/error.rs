//! # Error Module
//!
//! This module provides custom error types for the `gesture_relay` process.
//! It uses the `thiserror` crate for ergonomic error handling.

use thiserror::Error;

/// Result type alias for `gesture_relay` operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to open serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// Failed to read from serial port, or the device went away.
    #[error("Failed to read from serial port: {0}")]
    PortRead(String),

    /// Discovery found no serial device.
    #[error("No serial device matches '{pattern}*'")]
    NoDevice { pattern: String },

    /// Discovery found more than one serial device.
    #[error("Several serial devices match '{pattern}*': {}", candidates.join(", "))]
    AmbiguousDevice {
        pattern: String,
        candidates: Vec<String>,
    },

    /// The serial supervisor gave up after too many consecutive failures.
    #[error("Serial link not recovered after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// A display power command failed or exited unsuccessfully.
    #[error("Display command '{command}' failed: {reason}")]
    PowerCommand { command: String, reason: String },

    /// The WebSocket listener could not be bound.
    #[error("Failed to listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// WebSocket handshake or protocol failure on one connection.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayError {
    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new port read error.
    #[must_use]
    pub fn port_read(msg: impl Into<String>) -> Self {
        Self::PortRead(msg.into())
    }

    /// Creates a new power command error.
    #[must_use]
    pub fn power_command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PowerCommand {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
