//! Pre-serialized messages shared by every endpoint of a broadcast.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while preparing a broadcast.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("payload is not valid UTF-8 for a text message: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Frame type of a prepared message.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// UTF-8 text, the usual choice for log lines.
    #[default]
    Text,
    /// Arbitrary bytes.
    Binary,
}

/// A message framed once and reused for every endpoint.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    kind: MessageKind,
    payload: Bytes,
}

impl PreparedMessage {
    /// Frame `payload` as a message of the given kind.
    ///
    /// Text messages must be valid UTF-8.
    pub fn prepare(kind: MessageKind, payload: &[u8]) -> Result<Self, PumpError> {
        if kind == MessageKind::Text {
            std::str::from_utf8(payload)?;
        }

        Ok(Self {
            kind,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Frame type.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as text, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            // Validated in prepare().
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            MessageKind::Binary => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
