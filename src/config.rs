//! # Config Module
//!
//! Command-line configuration of the relay.

use clap::Parser;
use tokio::time::Duration;

use crate::error::{RelayError, Result};
use crate::hub::WireFormat;
use crate::hub::server::DEFAULT_LISTEN_ADDR;
use crate::power::command::{DEFAULT_POWER_OFF, DEFAULT_POWER_ON};
use crate::power::{CommandLine, ShellDisplayPower};
use crate::serial::port::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PREFIX};
use crate::serial::{DeviceSelection, PortSettings, RetryPolicy};

/// Relays gesture sensor events to display clients and puts the display to
/// sleep when nobody is around.
#[derive(Debug, Clone, Parser)]
#[command(name = "gesture-relay", version, about)]
pub struct Args {
    /// Serial device of the sensor; discovered when omitted
    #[arg(long)]
    pub device: Option<String>,

    /// Device name prefix used for discovery
    #[arg(long, default_value = DEFAULT_DEVICE_PREFIX)]
    pub device_prefix: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// WebSocket listen address
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Seconds without presence before the display is switched off
    #[arg(long, default_value_t = 60)]
    pub off_delay: u64,

    /// Command switching the display on
    #[arg(long, default_value = DEFAULT_POWER_ON)]
    pub power_on_cmd: String,

    /// Command switching the display off
    #[arg(long, default_value = DEFAULT_POWER_OFF)]
    pub power_off_cmd: String,

    /// First reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub retry_initial_ms: u64,

    /// Longest reconnect delay in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub retry_max_ms: u64,

    /// Consecutive serial failures before giving up; unlimited when omitted
    #[arg(long)]
    pub retry_max_attempts: Option<u32>,

    /// Time limit for one write to a display client in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub send_timeout_ms: u64,

    /// Wire format of pushed events
    #[arg(long, value_enum, default_value_t = WireFormat::Token)]
    pub format: WireFormat,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: PortSettings,
    pub listen: String,
    pub off_delay: Duration,
    pub power_on: CommandLine,
    pub power_off: CommandLine,
    pub retry: RetryPolicy,
    pub send_timeout: Duration,
    pub format: WireFormat,
}

impl RelayConfig {
    /// Builds and validates the configuration from parsed arguments.
    pub fn from_args(args: Args) -> Result<Self> {
        let device = match args.device {
            Some(path) => DeviceSelection::Path(path),
            None => DeviceSelection::Discover {
                prefix: args.device_prefix,
            },
        };
        let config = RelayConfig {
            port: PortSettings::new(device).with_baud_rate(args.baud),
            listen: args.listen,
            off_delay: Duration::from_secs(args.off_delay),
            power_on: CommandLine::parse(&args.power_on_cmd)?,
            power_off: CommandLine::parse(&args.power_off_cmd)?,
            retry: RetryPolicy {
                initial: Duration::from_millis(args.retry_initial_ms),
                max_delay: Duration::from_millis(args.retry_max_ms),
                max_attempts: args.retry_max_attempts,
            },
            send_timeout: Duration::from_millis(args.send_timeout_ms),
            format: args.format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.baud_rate == 0 {
            return Err(RelayError::invalid_config("baud rate must be positive"));
        }
        if let DeviceSelection::Discover { prefix } = &self.port.device {
            if prefix.is_empty() {
                return Err(RelayError::invalid_config("device prefix must not be empty"));
            }
        }
        if self.off_delay.is_zero() {
            return Err(RelayError::invalid_config("off delay must be positive"));
        }
        if self.retry.initial.is_zero() {
            return Err(RelayError::invalid_config("retry delay must be positive"));
        }
        if self.retry.max_delay < self.retry.initial {
            return Err(RelayError::invalid_config(
                "longest retry delay is shorter than the first one",
            ));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(RelayError::invalid_config("retry attempts must be positive"));
        }
        if self.send_timeout.is_zero() {
            return Err(RelayError::invalid_config("send timeout must be positive"));
        }
        Ok(())
    }

    /// display switch built from the configured commands
    pub fn display_power(&self) -> ShellDisplayPower {
        ShellDisplayPower::new(self.power_on.clone(), self.power_off.clone())
    }
}
