//! Handling of and communication with control panel WebSocket connections.

use futures::{FutureExt, SinkExt, StreamExt, select};
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use tungstenite::{Error, Message};

use std::net::SocketAddr;
use std::sync::Arc;

use crate::{RESPONSE_BRIDGE_SHUTDOWN, TaskAliveToken};
use crate::bridge::Bridge;
use crate::control::{self, Request, Response};

/// An incoming WS stream for receiving data.
type WSIncomingStream = SplitStream<WebSocketStream<TcpStream>>;
/// An outgoing WS sink for sending data.
type WSOutgoingSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A WebSocket connection handler. Every text message is a control request and is answered with
/// exactly one text message.
pub struct WSConnection {
    /// The address of the incoming connection.
    addr: SocketAddr,
    /// The incoming WS stream for receiving requests.
    ws_incoming: WSIncomingStream,
    /// The outgoing WS sink for sending responses.
    ws_outgoing: WSOutgoingSink,
    /// The bridge that requests are carried out against.
    bridge: Arc<Bridge>,
    /// A watcher for shutdown signals.
    shutdown_rx: watch::Receiver<()>,
    /// A token that signals that the parent `tokio` task is alive as long as it has not been
    /// dropped.
    _task_alive_token: TaskAliveToken,
}

impl WSConnection {
    /// Creates a new `WSConnection` to handle an incoming WebSocket connection from `addr`.
    pub async fn new(
        raw_stream: TcpStream,
        addr: SocketAddr,
        bridge: Arc<Bridge>,
        shutdown_rx: watch::Receiver<()>,
        task_alive_token: TaskAliveToken,
    ) -> Result<Self, Error> {
        debug!("Incoming TCP connection from: {}", addr);

        let ws_stream = tokio_tungstenite::accept_async(raw_stream).await?;
        info!("WebSocket connection established: {}", addr);

        let (ws_outgoing, ws_incoming) = ws_stream.split();

        Ok(WSConnection {
            addr,
            ws_incoming,
            ws_outgoing,
            bridge,
            shutdown_rx,
            _task_alive_token: task_alive_token,
        })
    }

    /// Processes requests until the client disconnects or the panel shuts down.
    pub async fn process(mut self) {
        loop {
            let message = select! {
                m = self.ws_incoming.next().fuse() => m,
                _ = self.shutdown_rx.changed().fuse() => {
                    let _ = self.ws_outgoing.send(Message::text(RESPONSE_BRIDGE_SHUTDOWN)).await;
                    break;
                },
            };

            let text = match message {
                Some(Ok(Message::Text(t))) => t,
                // The client disconnected
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Error receiving from {}: {}", self.addr, e);
                    break;
                }
            };

            debug!("Request from {}: {}", self.addr, text.trim());
            let response = respond(self.bridge.clone(), &text).await;

            if self.ws_outgoing.send(Message::text(response.to_string())).await.is_err() {
                break;
            }
        }

        if let Err(e) = self.ws_outgoing.close().await {
            debug!("Failed to close WebSocket: {}", e);
        }

        info!("{} disconnected", self.addr);
    }
}

/// Parses and carries out a request. Bridge calls may block on serial I/O, so they run on the
/// blocking thread pool.
async fn respond(bridge: Arc<Bridge>, text: &str) -> Response {
    let request = match text.parse::<Request>() {
        Ok(r) => r,
        Err(e) => return Response::Error(e.to_string()),
    };

    task::spawn_blocking(move || control::handle(&bridge, &request))
        .await
        .unwrap_or_else(|e| Response::Error(format!("request failed: {}", e)))
}
