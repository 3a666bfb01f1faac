//! Reconnecting stream client.
//!
//! A [`StreamClient`] keeps one persistent connection to the relay. Each
//! session runs on a single driver task that owns the transport and the one
//! backoff timer:
//!
//! ```text
//! Closed -> Connecting -> Open
//!             ^  |         |
//!             |  v         | transport closed or failed
//!           Backoff        v
//!             ^--------- Connecting
//! ```
//!
//! Any state moves to `Closed` on [`StreamClient::disconnect`], or when the
//! driver gives up after `max_attempts` consecutive failed attempts.
//!
//! A link that drops before it has delivered a frame or stayed up for
//! `base_delay` (at least one second) counts as a failed attempt and goes
//! through `Backoff`, so a relay that accepts and immediately closes still
//! hits the cap.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Frame, RelayMessage};
use crate::transport::{Connector, Transport, WsConnector};

/// Callback for decoded inbound messages.
pub type MessageHandler = Arc<dyn Fn(RelayMessage) + Send + Sync>;

/// Callback for fatal session errors.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Runtime settings for a [`StreamClient`].
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Relay URL.
    pub url: String,

    /// Backoff unit; attempt `n` waits `base_delay * n`.
    pub base_delay: Duration,

    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,

    /// Upper bound for a single connect attempt.
    pub connect_timeout: Duration,

    /// Capacity of the outbound queue.
    pub send_buffer: usize,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            send_buffer: 256,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, or the session ended.
    Closed,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected; sends are accepted.
    Open,
    /// Waiting before the next attempt.
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}

/// Snapshot of a client's connection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Current state.
    pub state: ConnectionState,

    /// Consecutive failed attempts so far; zero once open.
    pub attempt: u32,

    /// Relay URL.
    pub url: String,

    /// Set when the session gave up: the number of failed attempts.
    pub gave_up_after: Option<u32>,

    generation: u64,
}

impl Session {
    fn closed(url: &str) -> Self {
        Self {
            state: ConnectionState::Closed,
            attempt: 0,
            url: url.to_string(),
            gave_up_after: None,
            generation: 0,
        }
    }

    /// Whether the session gave up reconnecting.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.gave_up_after.is_some()
    }
}

#[derive(Clone, Default)]
struct Handlers {
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
}

struct Driver {
    shutdown: watch::Sender<bool>,
    outbound: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

/// A persistent, self-healing connection to the relay.
pub struct StreamClient {
    config: StreamClientConfig,
    connector: Arc<dyn Connector>,
    handlers: Handlers,
    session: Arc<watch::Sender<Session>>,
    driver: Mutex<Option<Driver>>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("config", &self.config)
            .field("session", &*self.session.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client that connects over WebSocket.
    #[must_use]
    pub fn new(config: StreamClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a client with a custom connector.
    #[must_use]
    pub fn with_connector(config: StreamClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (session, _) = watch::channel(Session::closed(&config.url));
        Self {
            config,
            connector,
            handlers: Handlers::default(),
            session: Arc::new(session),
            driver: Mutex::new(None),
        }
    }

    /// Register the handler for inbound messages. Replaces any previous one.
    pub fn on_message(&mut self, handler: impl Fn(RelayMessage) + Send + Sync + 'static) {
        self.handlers.on_message = Some(Arc::new(handler));
    }

    /// Register the handler for fatal session errors.
    pub fn on_error(&mut self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.handlers.on_error = Some(Arc::new(handler));
    }

    /// Relay URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch the connection session.
    #[must_use]
    pub fn session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Start a session if none is live and wait until it is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconnectExhausted`] if the session gave up, or
    /// [`Error::Disconnected`] if [`disconnect`](Self::disconnect) was
    /// called first.
    pub async fn connect(&self) -> Result<()> {
        let mut session_rx = self.session.subscribe();
        self.ensure_driver();

        loop {
            {
                let session = session_rx.borrow_and_update();
                match session.state {
                    ConnectionState::Open => return Ok(()),
                    ConnectionState::Closed => {
                        return Err(match session.gave_up_after {
                            Some(attempts) => Error::ReconnectExhausted {
                                url: session.url.clone(),
                                attempts,
                            },
                            None => Error::Disconnected,
                        });
                    }
                    ConnectionState::Connecting | ConnectionState::Backoff => {}
                }
            }
            if session_rx.changed().await.is_err() {
                return Err(Error::Disconnected);
            }
        }
    }

    fn ensure_driver(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return;
        }

        let mut generation = 0;
        self.session.send_modify(|session| {
            session.generation += 1;
            session.state = ConnectionState::Connecting;
            session.attempt = 0;
            session.gave_up_after = None;
            generation = session.generation;
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.send_buffer.max(1));
        let session_driver = SessionDriver {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            handlers: self.handlers.clone(),
            session: Arc::clone(&self.session),
            generation,
            shutdown: shutdown_rx,
            outbound: outbound_rx,
        };

        debug!(url = %self.config.url, generation, "Starting stream session");
        *driver = Some(Driver {
            shutdown: shutdown_tx,
            outbound: outbound_tx,
            task: tokio::spawn(session_driver.run()),
        });
    }

    /// Queue a message for the relay.
    ///
    /// Returns `false` if the message was dropped: the connection is not
    /// open, the outbound queue is full, or the message cannot be encoded.
    pub fn send(&self, message: &RelayMessage) -> bool {
        if !self.is_open() {
            trace!(kind = %message.kind(), "Not connected, dropping message");
            return false;
        }

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %message.kind(), error = %e, "Failed to encode message");
                return false;
            }
        };

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(driver) = driver.as_ref() else {
            return false;
        };

        match driver.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind = %message.kind(), "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// End the session. Idempotent.
    ///
    /// The state becomes `Closed` immediately; the driver closes the
    /// transport and cancels any pending backoff in the background.
    pub fn disconnect(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.session.send_if_modified(|session| {
            // Bumping the generation makes the old driver's updates no-ops.
            session.generation += 1;
            session.attempt = 0;
            let changed = session.state != ConnectionState::Closed;
            session.state = ConnectionState::Closed;
            changed
        });

        if let Some(driver) = driver {
            info!(url = %self.config.url, "Disconnecting from relay");
            let _ = driver.shutdown.send(true);
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Shortest time a link must stay up before its drop no longer counts as a
/// failed attempt. Receiving any frame also proves the link.
const MIN_STABLE_LINK: Duration = Duration::from_secs(1);

enum OpenExit {
    Shutdown,
    Dropped { stable: bool },
}

struct SessionDriver {
    config: StreamClientConfig,
    connector: Arc<dyn Connector>,
    handlers: Handlers,
    session: Arc<watch::Sender<Session>>,
    generation: u64,
    shutdown: watch::Receiver<bool>,
    outbound: mpsc::Receiver<String>,
}

impl SessionDriver {
    async fn run(mut self) {
        let url = self.config.url.clone();
        let mut failures: u32 = 0;

        loop {
            self.publish(ConnectionState::Connecting, failures, None);

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = timeout(self.config.connect_timeout, self.connector.connect(&url)) => result,
            };

            match outcome {
                Ok(Ok(transport)) => {
                    self.publish(ConnectionState::Open, 0, None);
                    info!(url = %url, "Connected to relay");

                    match self.run_open(transport).await {
                        OpenExit::Shutdown => break,
                        OpenExit::Dropped { stable } => {
                            self.discard_pending();
                            if stable {
                                failures = 0;
                                continue;
                            }
                            warn!(url = %url, attempt = failures + 1, "Connection dropped before it was stable");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(url = %url, attempt = failures + 1, error = %e, "Connect attempt failed");
                }
                Err(_) => {
                    warn!(url = %url, attempt = failures + 1, "Connect attempt timed out");
                }
            }

            failures += 1;
            if failures >= self.config.max_attempts {
                self.give_up(&url, failures);
                return;
            }

            let delay = self.config.base_delay * failures;
            self.publish(ConnectionState::Backoff, failures, None);
            debug!(url = %url, attempt = failures, delay_ms = delay.as_millis(), "Backing off");

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                () = sleep(delay) => {}
            }
        }

        trace!(url = %url, "Stream session ended");
        self.publish(ConnectionState::Closed, 0, None);
    }

    async fn run_open(&mut self, mut transport: Box<dyn Transport>) -> OpenExit {
        let opened = Instant::now();
        let stable_after = self.config.base_delay.max(MIN_STABLE_LINK);
        let mut received = false;
        let dropped = |received: bool| OpenExit::Dropped {
            stable: received || opened.elapsed() >= stable_after,
        };

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    transport.close().await;
                    return OpenExit::Shutdown;
                }
                Some(text) = self.outbound.recv() => {
                    if let Err(e) = transport.send(Frame::Text(text)).await {
                        warn!(error = %e, "Send failed, connection dropped");
                        transport.close().await;
                        return dropped(received);
                    }
                }
                inbound = transport.recv() => match inbound {
                    Some(Ok(frame)) => {
                        received = true;
                        self.dispatch(&frame);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport failed, reconnecting");
                        return dropped(received);
                    }
                    None => {
                        info!("Relay closed the connection, reconnecting");
                        return dropped(received);
                    }
                },
            }
        }
    }

    fn dispatch(&self, frame: &Frame) {
        match frame.decode() {
            Ok(message) => {
                trace!(kind = %message.kind(), "Received message");
                if let Some(handler) = &self.handlers.on_message {
                    handler(message);
                }
            }
            Err(e) => debug!(error = %e, bytes = frame.len(), "Discarding malformed frame"),
        }
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0_usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded messages queued before the connection dropped");
        }
    }

    fn give_up(&self, url: &str, attempts: u32) {
        let err = Error::ReconnectExhausted {
            url: url.to_string(),
            attempts,
        };
        error!(url, attempts, "Giving up on relay connection");

        if self.publish(ConnectionState::Closed, attempts, Some(attempts)) {
            if let Some(handler) = &self.handlers.on_error {
                handler(&err);
            }
        }
    }

    /// Update the shared session unless it has moved on to a newer one.
    fn publish(&self, state: ConnectionState, attempt: u32, gave_up_after: Option<u32>) -> bool {
        self.session.send_if_modified(|session| {
            if session.generation != self.generation {
                return false;
            }
            session.state = state;
            session.attempt = attempt;
            session.gave_up_after = gave_up_after;
            true
        })
    }
}
