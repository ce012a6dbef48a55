//! Enumeration and opening of serial devices.

use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};

use std::time::Duration;

use crate::config::BridgeConfig;

/// A source of serial devices. The bridge only ever reaches hardware through this trait, so tests
/// can substitute their own devices.
pub trait PortProvider: Send + Sync {
    /// Returns the devices that are currently attachable.
    fn available(&self) -> serialport::Result<Vec<SerialPortInfo>>;

    /// Opens the device at `path`.
    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> serialport::Result<Box<dyn SerialPort>>;
}

/// The serial devices attached to this machine.
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available(&self) -> serialport::Result<Vec<SerialPortInfo>> {
        serialport::available_ports()
    }

    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> serialport::Result<Box<dyn SerialPort>> {
        serialport::new(path, baud_rate).timeout(timeout).open()
    }
}

/// A [`PortProvider`] built from a listing function and an opening function.
pub struct FnPorts<L, O> {
    list: L,
    open: O,
}

impl<L, O> FnPorts<L, O>
where
    L: Fn() -> serialport::Result<Vec<SerialPortInfo>> + Send + Sync,
    O: Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync,
{
    /// Returns a provider that lists devices with `list` and opens a path at a baud rate with
    /// `open`.
    pub fn new(list: L, open: O) -> Self {
        FnPorts {
            list,
            open,
        }
    }
}

impl<L, O> PortProvider for FnPorts<L, O>
where
    L: Fn() -> serialport::Result<Vec<SerialPortInfo>> + Send + Sync,
    O: Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync,
{
    fn available(&self) -> serialport::Result<Vec<SerialPortInfo>> {
        (self.list)()
    }

    fn open(
        &self,
        path: &str,
        baud_rate: u32,
        _timeout: Duration,
    ) -> serialport::Result<Box<dyn SerialPort>> {
        (self.open)(path, baud_rate)
    }
}

/// An attachable device as shown to the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// The path used to open the device.
    pub path: String,
    /// A human-readable description of the device.
    pub description: String,
}

impl From<SerialPortInfo> for DeviceCandidate {
    fn from(info: SerialPortInfo) -> Self {
        let description = describe(&info);

        DeviceCandidate {
            path: info.port_name,
            description,
        }
    }
}

/// A point-in-time enumeration of attachable devices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceList {
    pub candidates: Vec<DeviceCandidate>,
    /// The index of the device to select by default.
    pub preferred: usize,
}

/// Returns the USB product name, the USB manufacturer, or the port name, whichever is available
/// first.
fn describe(info: &SerialPortInfo) -> String {
    match info.port_type {
        SerialPortType::UsbPort(ref usb) => usb.product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .unwrap_or_else(|| info.port_name.clone()),
        _ => info.port_name.clone(),
    }
}

/// Returns the index of the first candidate whose description or path contains `preferred`
/// (ignoring case), or 0 if there is none.
pub fn preferred_index(candidates: &[DeviceCandidate], preferred: &str) -> usize {
    if preferred.is_empty() {
        return 0;
    }

    let preferred = preferred.to_lowercase();

    candidates
        .iter()
        .position(|c| {
            c.description.to_lowercase().contains(&preferred)
                || c.path.to_lowercase().contains(&preferred)
        })
        .unwrap_or(0)
}

/// Enumerates the devices available from `ports` and picks the preferred one.
pub fn list_devices<P: PortProvider + ?Sized>(
    ports: &P,
    preferred: &str,
) -> serialport::Result<DeviceList> {
    let candidates = ports.available()?
        .into_iter()
        .map(DeviceCandidate::from)
        .collect::<Vec<_>>();
    let preferred = preferred_index(&candidates, preferred);

    Ok(DeviceList {
        candidates,
        preferred,
    })
}

/// Opens the device at `path` with the configured settings and discards any input that was
/// already waiting, so that stale data is not parsed as telemetry.
pub fn open_port<P: PortProvider + ?Sized>(
    ports: &P,
    path: &str,
    config: &BridgeConfig,
) -> serialport::Result<Box<dyn SerialPort>> {
    ports.open(path, config.baud_rate, config.read_timeout)
        .and_then(|p| p.clear(ClearBuffer::Input).map(|_| p))
}
