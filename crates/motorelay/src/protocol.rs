//! Relay wire protocol.
//!
//! Every WebSocket frame carries one JSON object:
//!
//! ```json
//! {"type": "location", "motoId": "moto-1", "data": {"latitude": -23.5, "longitude": -46.6, "timestamp": 1700000000000}}
//! ```
//!
//! `type` selects the payload: `location` carries a [`PositionSample`],
//! `status` and `error` carry a string. Frames may arrive as text or as
//! binary; binary frames are UTF-8 JSON as well.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sample::{PositionSample, SubjectId};

/// Discriminant of a [`RelayMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A position update.
    Location,
    /// Free-form status text.
    Status,
    /// Free-form error text.
    Error,
}

impl MessageKind {
    /// Parse the wire name of a kind.
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "location" => Some(Self::Location),
            "status" => Some(Self::Status),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayMessage {
    /// A subject's new position.
    Location {
        /// Subject the sample belongs to.
        #[serde(rename = "motoId", default, skip_serializing_if = "Option::is_none")]
        subject: Option<SubjectId>,
        /// The sample.
        data: PositionSample,
    },

    /// Status text, e.g. "tracking started".
    Status {
        /// Subject the status refers to.
        #[serde(rename = "motoId", default, skip_serializing_if = "Option::is_none")]
        subject: Option<SubjectId>,
        /// Status text.
        data: String,
    },

    /// Error text reported by a peer.
    Error {
        /// Subject the error refers to.
        #[serde(rename = "motoId", default, skip_serializing_if = "Option::is_none")]
        subject: Option<SubjectId>,
        /// Error text.
        data: String,
    },
}

impl RelayMessage {
    /// A location update for `subject`.
    #[must_use]
    pub fn location(subject: SubjectId, sample: PositionSample) -> Self {
        Self::Location {
            subject: Some(subject),
            data: sample,
        }
    }

    /// A status message.
    #[must_use]
    pub fn status(subject: Option<SubjectId>, text: impl Into<String>) -> Self {
        Self::Status {
            subject,
            data: text.into(),
        }
    }

    /// An error message.
    #[must_use]
    pub fn error(subject: Option<SubjectId>, text: impl Into<String>) -> Self {
        Self::Error {
            subject,
            data: text.into(),
        }
    }

    /// The kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Location { .. } => MessageKind::Location,
            Self::Status { .. } => MessageKind::Status,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// The subject this message refers to, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectId> {
        match self {
            Self::Location { subject, .. }
            | Self::Status { subject, .. }
            | Self::Error { subject, .. } => subject.as_ref(),
        }
    }

    /// The position carried by a location message.
    #[must_use]
    pub fn sample(&self) -> Option<&PositionSample> {
        match self {
            Self::Location { data, .. } => Some(data),
            Self::Status { .. } | Self::Error { .. } => None,
        }
    }

    /// Serialize to the JSON text sent in a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite floats).
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode this frame into a message.
    ///
    /// # Errors
    ///
    /// See [`decode_frame`].
    pub fn decode(&self) -> Result<RelayMessage> {
        decode_frame(self)
    }
}

/// Decode a frame of either kind.
///
/// # Errors
///
/// Returns [`Error::Decode`] when a binary frame is not UTF-8 or the text is
/// not a relay message, and [`Error::UnknownMessageKind`] for a well-formed
/// message with an unrecognised `type`.
pub fn decode_frame(frame: &Frame) -> Result<RelayMessage> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::decode(format!("binary frame is not UTF-8: {e}")))?;
            decode_text(text)
        }
    }
}

/// Decode the JSON text of a frame.
///
/// # Errors
///
/// See [`decode_frame`].
pub fn decode_text(text: &str) -> Result<RelayMessage> {
    let value: Value = serde_json::from_str(text).map_err(|e| Error::decode(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::decode("missing string field 'type'"))?;

    if MessageKind::parse(kind).is_none() {
        return Err(Error::UnknownMessageKind {
            kind: kind.to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| Error::decode(e.to_string()))
}
