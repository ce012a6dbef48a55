//! Errors returned by the bridge.

use thiserror::Error;

use std::io;

/// A synchronous failure returned to callers of the link lifecycle operations. These never affect
/// an existing connection.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The requested device could not be opened.
    #[error("Unable to connect to serial port {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// The requested device index is not part of the current enumeration.
    #[error("Invalid serial port selected: index {index} but {available} device(s) available")]
    InvalidSelection { index: usize, available: usize },

    /// The attachable devices could not be enumerated.
    #[error("Unable to list serial ports: {0}")]
    Enumeration(#[source] serialport::Error),

    /// The link worker thread could not be started.
    #[error("Unable to start the link worker: {0}")]
    Spawn(#[source] io::Error),
}

/// An I/O failure on an open link. Always fatal to the worker that hit it; it is only ever
/// surfaced to callers as the link's fault flag.
#[derive(Error, Debug)]
pub enum LinkFault {
    /// The worker could not (re)open its device.
    #[error("failed to open device: {0}")]
    Open(#[source] serialport::Error),

    /// Writing a command to the device failed.
    #[error("failed to write to device: {0}")]
    Write(#[source] io::Error),

    /// Reading from the device failed.
    #[error("failed to read from device: {0}")]
    Read(#[source] io::Error),
}

impl From<serialport::Error> for LinkFault {
    fn from(e: serialport::Error) -> Self {
        LinkFault::Read(e.into())
    }
}

#[cfg(test)]
mod tests {
    use serialport::ErrorKind;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::InvalidSelection { index: 3, available: 1 };
        assert_eq!(
            "Invalid serial port selected: index 3 but 1 device(s) available",
            err.to_string(),
        );

        let err = BridgeError::DeviceOpen {
            path: "/dev/ttyACM0".to_string(),
            source: serialport::Error::new(ErrorKind::NoDevice, "gone"),
        };
        assert_eq!("Unable to connect to serial port /dev/ttyACM0: gone", err.to_string());
    }

    #[test]
    fn test_fault_from_serialport_error() {
        let fault = LinkFault::from(serialport::Error::new(ErrorKind::NoDevice, "unplugged"));

        assert!(matches!(fault, LinkFault::Read(_)));
        assert_eq!("failed to read from device: unplugged", fault.to_string());
    }
}
