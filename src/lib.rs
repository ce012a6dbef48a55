//! A bridge between a companion robot's microcontroller and its control panel.
//!
//! The robot is driven over a single serial link. Any number of producers queue commands (see
//! [`CommandQueue`]); a single background worker writes them to the device in order while reading
//! back telemetry (see [`Telemetry`]). A [`Bridge`] owns all of this and manages the link's
//! lifecycle. The control panel is exposed as a WebSocket API that accepts text requests (see
//! [`control`]).

pub mod bridge;
pub mod config;
mod connection;
pub mod control;
pub mod error;
pub mod playback;
pub mod queue;
pub mod serial;
pub mod telemetry;

use futures::channel::mpsc;
use futures::{FutureExt, StreamExt, pin_mut, select};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, warn};

use std::net::SocketAddr;
use std::sync::Arc;

pub use crate::bridge::Bridge;
pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, LinkFault};
pub use crate::playback::PlaybackFlag;
pub use crate::queue::{Command, CommandQueue};
pub use crate::serial::ConnectionState;
pub use crate::telemetry::{BatteryStatus, Telemetry, TelemetryEvent};

use crate::connection::WSConnection;

/// Sent to connected clients when the control panel shuts down.
pub const RESPONSE_BRIDGE_SHUTDOWN: &str = "ERROR control panel shutting down";

/// A token that signals that a `tokio` task is still alive as long as it has not been dropped.
#[derive(Clone)]
pub struct TaskAliveToken(mpsc::Sender<()>);

/// A handle to a running control panel.
pub struct PanelHandle {
    shutdown_tx: watch::Sender<()>,
}

impl PanelHandle {
    /// Shuts the control panel down. Dropping the handle has the same effect.
    pub fn terminate(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Runs the control panel for the serial devices attached to this machine until ctrl-c is
/// received. If `auto_connect` is set, the preferred device is connected at start-up.
pub async fn launch(listening_addr: SocketAddr, config: BridgeConfig, auto_connect: bool) {
    let bridge = Arc::new(Bridge::system(config));

    if auto_connect {
        let b = bridge.clone();
        match task::spawn_blocking(move || b.auto_connect()).await {
            Ok(Ok(state)) => info!("Robot link {}", state),
            Ok(Err(e)) => warn!("Automatic connection failed: {}", e),
            Err(e) => error!("Automatic connection panicked: {}", e),
        }
    }

    let (panel_task, panel_handle) = launch_with_bridge(listening_addr, bridge);

    // Wait for ctrl-c
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to wait for ctrl-c signal: {}", e);
    }
    panel_handle.terminate();

    if let Err(e) = panel_task.await {
        error!("Control panel task failed: {}", e);
    }
}

/// Spawns the control panel for `bridge` on the current `tokio` runtime. Returns the panel's task,
/// which completes once the panel has shut down and the link has been disconnected, and a handle to
/// shut it down.
pub fn launch_with_bridge(
    listening_addr: SocketAddr,
    bridge: Arc<Bridge>,
) -> (JoinHandle<()>, PanelHandle) {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let task = tokio::spawn(serve(listening_addr, bridge, shutdown_rx));

    (task, PanelHandle { shutdown_tx })
}

/// Accepts control panel connections until a shutdown signal is received, then waits for every
/// connection to close and disconnects the link.
async fn serve(listening_addr: SocketAddr, bridge: Arc<Bridge>, mut shutdown_rx: watch::Receiver<()>) {
    // Create the event loop and TCP listener we'll accept connections on.
    let listener = match TcpListener::bind(listening_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", listening_addr, e);
            return;
        }
    };
    info!("Listening on: {}", listening_addr);

    // Set up channel to wait for all tasks to finish
    let (task_alive_token, mut tasks_finished_listener) = mpsc::channel(1);
    let task_alive_token = TaskAliveToken(task_alive_token);

    {
        let shutdown_rx_copy = shutdown_rx.clone();
        let bridge = bridge.clone();

        // Let's spawn the handling of each connection in a separate task.
        let listen = async move {
            while let Ok((stream, addr)) = listener.accept().await {
                let connection = WSConnection::new(
                    stream,
                    addr,
                    bridge.clone(),
                    shutdown_rx_copy.clone(),
                    task_alive_token.clone(),
                );

                tokio::spawn(async move {
                    match connection.await {
                        Ok(c) => c.process().await,
                        Err(e) => warn!("Error creating WebSocket connection: {}", e),
                    }
                });
            }
        }.fuse();

        // Listen for new connections until the shutdown signal is received
        pin_mut!(listen);
        select! {
            _ = listen => {},
            _ = shutdown_rx.changed().fuse() => {},
        }
    }

    // This will return `None` when all `Sender`s (owned by the tasks) have been dropped
    tasks_finished_listener.next().await;

    // Close the link so that the device is released
    if task::spawn_blocking(move || bridge.disconnect()).await.is_err() {
        error!("Failed to disconnect the robot link");
    }

    info!("Shutting down");
}
