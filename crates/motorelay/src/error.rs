//! Error types for motorelay.
//!
//! This module defines all error types used throughout the motorelay crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for motorelay operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Connection Errors ===
    /// The transport to the relay failed (connect, read or write).
    #[error("transport error on {url}: {message}")]
    Transport {
        /// Relay URL the transport was talking to.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The stream client gave up reconnecting.
    #[error("gave up connecting to {url} after {attempts} attempts")]
    ReconnectExhausted {
        /// Relay URL.
        url: String,
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// The stream client was explicitly disconnected.
    #[error("stream client is disconnected")]
    Disconnected,

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    // === Protocol Errors ===
    /// A frame could not be decoded into a relay message.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// A well-formed message carried a kind this build does not know.
    #[error("unknown message kind '{kind}'")]
    UnknownMessageKind {
        /// The `type` field as received.
        kind: String,
    },

    // === Position Source Errors ===
    /// The position source refused access.
    #[error("permission denied for position source '{name}': {message}")]
    PositionPermissionDenied {
        /// Name of the position source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// The position source is not available on this host.
    #[error("position source '{name}' is unavailable: {message}")]
    PositionUnavailable {
        /// Name of the position source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Tracker Errors ===
    /// A tracking session is already running.
    #[error("already tracking subject '{subject}'")]
    AlreadyTracking {
        /// Subject of the running session.
        subject: String,
    },

    /// No tracking session is running.
    #[error("no tracking session is running")]
    NotTracking,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for motorelay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Create a new transport error.
    #[must_use]
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a position permission error.
    #[must_use]
    pub fn permission_denied(name: &'static str, message: impl Into<String>) -> Self {
        Self::PositionPermissionDenied {
            name,
            message: message.into(),
        }
    }

    /// Create a position unavailable error.
    #[must_use]
    pub fn unavailable(name: &'static str, message: impl Into<String>) -> Self {
        Self::PositionUnavailable {
            name,
            message: message.into(),
        }
    }

    /// Check if this error is a position source failure the user must act on.
    #[must_use]
    pub fn is_position_source_error(&self) -> bool {
        matches!(
            self,
            Self::PositionPermissionDenied { .. } | Self::PositionUnavailable { .. }
        )
    }

    /// Check if this error means the stream client stopped for good.
    #[must_use]
    pub fn is_fatal_connectivity(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::Disconnected)
    }

    /// Check if this error came from decoding a single frame.
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::UnknownMessageKind { .. })
    }
}
