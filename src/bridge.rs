//! The command bridge. See [`Bridge`].

use tracing::{info, warn};

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::playback::PlaybackFlag;
use crate::queue::{Command, CommandQueue};
use crate::serial::{ConnectionState, DeviceList, LinkSupervisor, PortProvider, SystemPorts};
use crate::telemetry::Telemetry;

/// Everything the rest of the control panel needs to talk to the robot: the command queue, the
/// last-known telemetry, the playback flag, and the link lifecycle.
///
/// One bridge is created per process and shared by reference (e.g. in an `Arc`). Dropping it
/// disconnects the link.
pub struct Bridge {
    queue: CommandQueue,
    telemetry: Telemetry,
    playback: PlaybackFlag,
    supervisor: LinkSupervisor,
}

impl Bridge {
    /// Returns a disconnected bridge that reaches devices through `ports`.
    pub fn new(config: BridgeConfig, ports: Arc<dyn PortProvider>) -> Self {
        let queue = CommandQueue::new();
        let telemetry = Telemetry::new();
        let playback = PlaybackFlag::new();
        let supervisor = LinkSupervisor::new(
            ports,
            config,
            queue.clone(),
            telemetry.clone(),
            playback.clone(),
        );

        Bridge {
            queue,
            telemetry,
            playback,
            supervisor,
        }
    }

    /// Returns a disconnected bridge for the serial devices attached to this machine.
    pub fn system(config: BridgeConfig) -> Self {
        Bridge::new(config, Arc::new(SystemPorts))
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The flag the video player raises while it has the display.
    pub fn playback(&self) -> &PlaybackFlag {
        &self.playback
    }

    /// Queues a command for the robot. Succeeds even while disconnected; the command is sent once
    /// a link exists, unless the queue is cleared first.
    pub fn enqueue(&self, command: Command) {
        self.queue.enqueue(command);
    }

    /// Queues several commands back to back.
    pub fn enqueue_all<I: IntoIterator<Item = Command>>(&self, commands: I) {
        self.queue.enqueue_all(commands);
    }

    /// See [`LinkSupervisor::list_candidates`].
    pub fn list_candidates(&self) -> Result<DeviceList, BridgeError> {
        self.supervisor.list_candidates()
    }

    /// See [`LinkSupervisor::probe`].
    pub fn probe(&self, index: usize) -> Result<String, BridgeError> {
        self.supervisor.probe(index)
    }

    /// See [`LinkSupervisor::connect`].
    pub fn connect(&self, index: usize) -> Result<ConnectionState, BridgeError> {
        self.supervisor.connect(index)
    }

    /// See [`LinkSupervisor::disconnect`].
    pub fn disconnect(&self) {
        self.supervisor.disconnect();
    }

    /// See [`LinkSupervisor::is_live`].
    pub fn is_live(&self) -> bool {
        self.supervisor.is_live()
    }

    /// See [`LinkSupervisor::state`].
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn is_worker_running(&self) -> bool {
        self.supervisor.is_worker_running()
    }

    /// Connects to the preferred device if not already connected. Used at start-up, so failures
    /// are logged and returned but leave the bridge usable.
    pub fn auto_connect(&self) -> Result<ConnectionState, BridgeError> {
        if self.is_live() {
            return Ok(ConnectionState::Connected);
        }

        let list = self.list_candidates()?;
        if list.candidates.is_empty() {
            warn!("No serial devices found");
            return Err(BridgeError::InvalidSelection {
                index: 0,
                available: 0,
            });
        }

        let candidate = &list.candidates[list.preferred];
        info!("Connecting to {} ({})", candidate.description, candidate.path);

        self.connect(list.preferred)
    }
}
