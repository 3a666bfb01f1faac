//! Transport abstraction for the stream client.
//!
//! The client only needs to open a connection, push frames and pull frames.
//! [`WsConnector`] does that over WebSocket; tests substitute scripted
//! connectors to simulate flaky links.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// An open, bidirectional connection to the relay.
#[async_trait]
pub trait Transport: Send {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be written; the connection
    /// should be considered dropped.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Receive the next data frame.
    ///
    /// Returns `None` once the peer has closed the connection. Must be
    /// cancel-safe: dropping the future never loses a frame.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Close the connection, ignoring failures.
    async fn close(&mut self);
}

/// Opens transports to a relay URL.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// Convert a data frame to a WebSocket message.
#[must_use]
pub fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Extract the data frame from a WebSocket message, if it carries one.
#[must_use]
pub fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

/// Connects to the relay over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        debug!(url, "Opening WebSocket");
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::transport(url, e.to_string()))?;
        trace!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WsTransport {
            url: url.to_string(),
            stream,
        }))
    }
}

/// A WebSocket connection opened by [`WsConnector`].
#[derive(Debug)]
pub struct WsTransport {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.stream
            .send(frame_to_message(frame))
            .await
            .map_err(|e| Error::transport(&self.url, e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Close(reason)) => {
                    debug!(url = %self.url, ?reason, "Relay closed the connection");
                    return None;
                }
                Ok(message) => {
                    if let Some(frame) = message_to_frame(message) {
                        return Some(Ok(frame));
                    }
                    // Control frames; pongs are queued by tungstenite itself.
                }
                Err(e) => return Some(Err(Error::transport(&self.url, e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(url = %self.url, error = %e, "Error while closing WebSocket");
        }
    }
}
