//! JSON wire protocol for room collaboration.
//!
//! One JSON object per WebSocket text frame:
//!
//! ```text
//! server → client   {"type": "init", "code": "<snapshot>"}      first frame, exactly once
//! client → server   {"type": "code_update", "code": "<code>"}   full-snapshot replacement
//! server → client   a peer's code_update text, forwarded unmodified
//! ```
//!
//! There is no versioning or sequence number: an update replaces the whole
//! snapshot and the last one to arrive wins.

use serde::{Deserialize, Serialize};

/// Messages a client may send.
///
/// Decoded exactly once at the transport boundary. Anything that is not a
/// well-formed known message collapses into [`ClientMessage::Unknown`],
/// which the engine drops without closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the room's code with this snapshot.
    CodeUpdate { code: String },
    /// Catch-all for unrecognized `type` tags.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Create a code update message.
    pub fn code_update(code: impl Into<String>) -> Self {
        Self::CodeUpdate { code: code.into() }
    }

    /// Decode a client frame. Malformed JSON, a missing field, and an
    /// unknown `type` all map to [`ClientMessage::Unknown`].
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(ClientMessage::Unknown)
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The room's current snapshot, delivered once on connect.
    Init { code: String },
    /// A peer's update. On the wire this is the peer's own frame relayed
    /// verbatim; the variant exists for the client-side decode.
    CodeUpdate { code: String },
}

impl ServerMessage {
    /// Create an init message.
    pub fn init(code: impl Into<String>) -> Self {
        Self::Init { code: code.into() }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize a server frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
