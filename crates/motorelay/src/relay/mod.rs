//! Broadcast relay.
//!
//! Accepts WebSocket connections and re-publishes every valid frame a peer
//! sends to all other connected peers, byte for byte. There is no
//! authentication and no per-subject routing.

pub mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::transport::{frame_to_message, message_to_frame};

pub use registry::{BroadcastReport, ConnectionId, Registry};

/// How long a closing peer's writer may take to flush.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// A bound relay, ready to [`run`](Relay::run).
#[derive(Debug)]
pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
    peer_buffer: usize,
    ws_config: WebSocketConfig,
}

impl Relay {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            peer_buffer: config.peer_buffer.max(1),
            ws_config,
        })
    }

    /// The address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// On shutdown every peer's writer is told to close and connection
    /// tasks are stopped.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged and
    /// retried.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Relay listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            registry: Arc::clone(&self.registry),
                            peer,
                            buffer: self.peer_buffer,
                            ws_config: self.ws_config,
                        };
                        connections.spawn(connection.serve(stream));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let closed = self.registry.clear();
        info!(peers = closed, "Relay shutting down");
        connections.shutdown().await;
        Ok(())
    }
}

struct Connection {
    registry: Arc<Registry>,
    peer: SocketAddr,
    buffer: usize,
    ws_config: WebSocketConfig,
}

impl Connection {
    async fn serve(self, stream: TcpStream) {
        let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(self.ws_config))
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                debug!(addr = %self.peer, error = %Error::from(e), "WebSocket handshake failed");
                return;
            }
        };

        let (mut sink, mut source) = ws.split();
        let (outbound, mut queued) = mpsc::channel::<Frame>(self.buffer);
        let id = self.registry.register(self.peer, outbound);
        info!(id, addr = %self.peer, peers = self.registry.len(), "Peer connected");

        // Reader and writer share this task, so aborting it stops both.
        let writer = async move {
            while let Some(frame) = queued.recv().await {
                if let Err(e) = sink.send(frame_to_message(frame)).await {
                    trace!(id, error = %e, "Write to peer failed");
                    return;
                }
            }
            let _ = sink.close().await;
        };
        tokio::pin!(writer);

        let reader = async {
            while let Some(received) = source.next().await {
                match received {
                    Ok(Message::Close(_)) => break,
                    Ok(message) => {
                        if let Some(frame) = message_to_frame(message) {
                            self.relay(id, &frame);
                        }
                    }
                    Err(e) => {
                        debug!(id, error = %e, "Peer connection failed");
                        break;
                    }
                }
            }
        };

        let writer_done = tokio::select! {
            () = &mut writer => true,
            () = reader => false,
        };

        self.registry.deregister(id);
        info!(id, addr = %self.peer, peers = self.registry.len(), "Peer disconnected");

        if !writer_done && timeout(WRITER_GRACE, &mut writer).await.is_err() {
            trace!(id, "Peer writer did not flush in time");
        }
    }

    fn relay(&self, id: ConnectionId, frame: &Frame) {
        match frame.decode() {
            Ok(message) => {
                let report = self.registry.broadcast(id, frame);
                trace!(
                    id,
                    kind = %message.kind(),
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Relayed frame"
                );
                if report.dropped > 0 {
                    debug!(id, dropped = report.dropped, "Some peers were too slow for a frame");
                }
            }
            Err(e) => debug!(id, error = %e, bytes = frame.len(), "Ignoring malformed frame"),
        }
    }
}
