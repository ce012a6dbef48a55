//! Serial link to the robot's microcontroller.

pub mod port;
mod supervisor;
pub mod worker;

pub use port::{DeviceCandidate, DeviceList, FnPorts, PortProvider, SystemPorts};
pub use supervisor::LinkSupervisor;

use std::fmt;

/// The state of the serial link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No worker exists.
    Disconnected,
    /// A worker owns the device and is processing I/O.
    Connected,
    /// The worker hit an I/O fault and must be cleaned up before reconnecting.
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Faulted => f.write_str("faulted"),
        }
    }
}
