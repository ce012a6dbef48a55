//! Lifecycle control of the serial link. See [`LinkSupervisor`].

use tracing::{error, info, warn};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::playback::PlaybackFlag;
use crate::queue::CommandQueue;
use crate::telemetry::Telemetry;

use super::port::{self, DeviceList, PortProvider};
use super::worker::{self, WorkerContext};
use super::ConnectionState;

/// Connects, disconnects and monitors the serial link, making sure that at most one link worker
/// exists and that a faulted worker is always cleaned up.
///
/// All lifecycle operations are serialized, so concurrent callers cannot start two workers.
pub struct LinkSupervisor {
    ports: Arc<dyn PortProvider>,
    config: BridgeConfig,
    queue: CommandQueue,
    telemetry: Telemetry,
    playback: PlaybackFlag,
    /// Tells the worker to stop. The worker also sets it when it faults.
    halt: Arc<AtomicBool>,
    /// The active worker. `Some` while connected.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LinkSupervisor {
    /// Returns a new disconnected `LinkSupervisor`. The worker it starts drains `queue`, updates
    /// `telemetry` and honors `playback`.
    pub fn new(
        ports: Arc<dyn PortProvider>,
        config: BridgeConfig,
        queue: CommandQueue,
        telemetry: Telemetry,
        playback: PlaybackFlag,
    ) -> Self {
        LinkSupervisor {
            ports,
            config,
            queue,
            telemetry,
            playback,
            halt: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enumerates the attachable devices and picks the one matching the preferred device
    /// substring.
    pub fn list_candidates(&self) -> Result<DeviceList, BridgeError> {
        port::list_devices(&*self.ports, &self.config.preferred_device)
            .map_err(BridgeError::Enumeration)
    }

    /// Checks that the device at `index` accepts a connection by opening it, discarding its
    /// pending input, and closing it again. Returns the device's path.
    pub fn probe(&self, index: usize) -> Result<String, BridgeError> {
        let list = self.list_candidates()?;
        let available = list.candidates.len();
        let candidate = list.candidates
            .into_iter()
            .nth(index)
            .ok_or(BridgeError::InvalidSelection { index, available })?;

        match port::open_port(&*self.ports, &candidate.path, &self.config) {
            // The port is closed as soon as it is dropped here
            Ok(_) => Ok(candidate.path),
            Err(e) => {
                warn!("Probe of {} failed: {}", candidate.path, e);
                Err(BridgeError::DeviceOpen {
                    path: candidate.path,
                    source: e,
                })
            }
        }
    }

    /// Toggles the link. If connected (even if faulted), disconnects. Otherwise probes the device
    /// at `index` and starts a worker for it.
    ///
    /// Returns the resulting state. On failure, the link stays disconnected.
    pub fn connect(&self, index: usize) -> Result<ConnectionState, BridgeError> {
        let mut worker = self.lock();

        if worker.is_some() {
            self.teardown(&mut worker);
            return Ok(ConnectionState::Disconnected);
        }

        let path = self.probe(index)?;

        self.halt.store(false, Ordering::SeqCst);
        // Telemetry stays unknown until the new link reports something
        self.telemetry.reset();

        let ctx = WorkerContext {
            path: path.clone(),
            ports: self.ports.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            telemetry: self.telemetry.clone(),
            playback: self.playback.clone(),
            halt: self.halt.clone(),
        };
        *worker = Some(worker::spawn(ctx).map_err(BridgeError::Spawn)?);

        info!("Connected to {}", path);
        Ok(ConnectionState::Connected)
    }

    /// Discards all pending commands, resets the telemetry, and stops the worker, waiting for it to
    /// exit. Does nothing but the resets if already disconnected.
    pub fn disconnect(&self) {
        let mut worker = self.lock();
        self.teardown(&mut worker);
    }

    /// Returns whether the link is connected and healthy. A faulted link, including one whose
    /// worker panicked, is disconnected as a side effect.
    pub fn is_live(&self) -> bool {
        let mut worker = self.lock();

        if worker.is_none() {
            return false;
        }

        if self.halt.load(Ordering::SeqCst) {
            info!("Link faulted, cleaning up");
            self.teardown(&mut worker);
            return false;
        }

        true
    }

    /// Returns the current state without cleaning up a faulted link.
    pub fn state(&self) -> ConnectionState {
        let worker = self.lock();

        match *worker {
            None => ConnectionState::Disconnected,
            Some(_) if self.halt.load(Ordering::SeqCst) => ConnectionState::Faulted,
            Some(_) => ConnectionState::Connected,
        }
    }

    /// Returns whether a worker thread is currently running.
    pub fn is_worker_running(&self) -> bool {
        self.lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    fn teardown(&self, worker: &mut Option<JoinHandle<()>>) {
        self.halt.store(true, Ordering::SeqCst);
        let mut discarded = self.queue.clear();
        self.telemetry.reset();

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("Link worker panicked");
            }
            info!("Disconnected");
        }

        // Producers and the last worker iteration may have raced the join
        discarded += self.queue.clear();
        self.telemetry.reset();

        if discarded > 0 {
            info!("Discarded {} pending command(s)", discarded);
        }
    }
}

impl Drop for LinkSupervisor {
    fn drop(&mut self) {
        self.disconnect();
    }
}
