use log::info;
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits, available_ports};

use crate::error::{RelayError, Result};

/// baud rate the sensor firmware talks at
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// name prefix used when no device path is configured
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/ttyACM";

/// how the serial device is chosen
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelection {
    /// fixed device path
    Path(String),
    /// the single available port whose name starts with the prefix
    Discover { prefix: String },
}

impl DeviceSelection {
    /// resolve to a device path
    pub fn resolve(&self) -> Result<String> {
        match self {
            DeviceSelection::Path(path) => Ok(path.clone()),
            DeviceSelection::Discover { prefix } => discover_device(prefix),
        }
    }
}

/// serial port settings
#[derive(Clone, Debug)]
pub struct PortSettings {
    pub device: DeviceSelection,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl PortSettings {
    /// 8N1 without flow control at the sensor's baud rate
    pub fn new(device: DeviceSelection) -> Self {
        PortSettings {
            device,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }

    /// set baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// open serial port
pub fn open_port(port_name: &str, settings: &PortSettings) -> Result<SerialStream> {
    match tokio_serial::new(port_name, settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .open_native_async()
    {
        Ok(stream) => {
            info!("Opened serial port {port_name} at {} baud", settings.baud_rate);
            Ok(stream)
        }
        Err(e) => Err(RelayError::port_open(port_name, e.to_string())),
    }
}

/// Picks the only port name starting with `prefix`.
///
/// Zero matches is [`RelayError::NoDevice`], several matches is
/// [`RelayError::AmbiguousDevice`].
pub fn select_device<I>(port_names: I, prefix: &str) -> Result<String>
where
    I: IntoIterator<Item = String>,
{
    let mut candidates: Vec<String> = port_names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect();
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => Err(RelayError::NoDevice {
            pattern: prefix.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(RelayError::AmbiguousDevice {
            pattern: prefix.to_string(),
            candidates,
        }),
    }
}

/// find the sensor among the available serial ports
pub fn discover_device(prefix: &str) -> Result<String> {
    let ports = available_ports()
        .map_err(|e| RelayError::port_open(format!("{prefix}*"), e.to_string()))?;
    let device = select_device(ports.into_iter().map(|p| p.port_name), prefix)?;
    info!("Discovered serial device {device}");
    Ok(device)
}
