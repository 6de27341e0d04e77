//! Envelope: the logical message exchanged between peers.
//!
//! Envelopes are created by the sender, consumed by the receiving dispatcher,
//! and never persisted.  The canonical text encoding is a JSON object:
//!
//! ```json
//! {
//!   "sender_id": "3f1c…",
//!   "sender_name": "Anon-3f1c2a",
//!   "type": "chat",
//!   "content": "hi",
//!   "filename": null,
//!   "timestamp": 1718000000.123
//! }
//! ```
//!
//! `content` and `filename` are always emitted (as `null` when absent) and are
//! optional on input.  `timestamp` is fractional seconds since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::identity::{Identity, PeerId};
use crate::protocol::frame::ProtocolError;

/// The kind of message carried in an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A text chat line.
    Chat,
    /// A file attachment; `content` holds the base64 file body.
    File,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::File => "file",
        }
    }
}

/// A chat or file message as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: PeerId,
    pub sender_name: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
}

impl Envelope {
    /// Builds an envelope stamped with `identity` and the current wall-clock time.
    pub fn new(
        identity: &Identity,
        kind: MessageType,
        content: Option<String>,
        filename: Option<String>,
    ) -> Self {
        Self {
            sender_id: identity.id().clone(),
            sender_name: identity.display_name().to_string(),
            kind,
            content,
            filename,
            timestamp: current_timestamp(),
        }
    }

    /// Convenience constructor for a chat line.
    pub fn chat(identity: &Identity, text: impl Into<String>) -> Self {
        Self::new(identity, MessageType::Chat, Some(text.into()), None)
    }

    /// Serializes to the canonical UTF-8 JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails (it cannot for
    /// finite timestamps, but non-finite floats are rejected by `serde_json`).
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses the canonical JSON text produced by [`Envelope::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] for invalid UTF-8, invalid
    /// JSON, missing required fields, or an unknown `type`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?;
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

/// Returns the current time as fractional seconds since the Unix epoch.
pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
