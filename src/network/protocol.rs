//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a single JSON object carrying a `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::swap::state::Payload;

/// Errors raised while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame is not a JSON object with a known `type`.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frame did not contain UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Open a new session and wait for a partner.
    #[serde(rename = "createSession")]
    CreateSession,

    /// Take the free slot of an existing session.
    #[serde(rename = "joinSession", rename_all = "camelCase")]
    JoinSession {
        /// Id handed out by `session_created`.
        session_id: String,
    },

    /// Latest code from the sender's editor.
    ///
    /// Older clients send this as `swap`.
    #[serde(rename = "code_update", alias = "swap")]
    CodeUpdate(PayloadUpdate),
}

/// Payload update body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadUpdate {
    /// Editor contents.
    pub code: String,
    /// Language identifier of the editor contents.
    #[serde(default)]
    pub language: String,
    /// Session the client believes it is in. Informational only; the
    /// server resolves the session from the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl PayloadUpdate {
    /// Drop the routing hint and keep the payload.
    pub fn into_payload(self) -> Payload {
        Payload {
            code: self.code,
            language: self.language,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A session was created for the requester.
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        /// Id to share with the partner.
        session_id: String,
    },

    /// The requester took the second slot.
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        /// Joined session.
        session_id: String,
    },

    /// Both slots are filled and the first round begins.
    GameStart {
        /// Initial countdown value (seconds).
        timer: u32,
    },

    /// Countdown broadcast, once per second.
    TimerUpdate {
        /// Seconds remaining in the round.
        timer: u32,
    },

    /// The swap is close.
    SwapWarning,

    /// The partner's code, delivered at the end of a round.
    CodeSwap(SwappedCode),

    /// Error message.
    Error {
        /// Human-readable message.
        message: String,
    },
}

/// Code handed over at swap time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwappedCode {
    /// Partner's code.
    pub code: String,
    /// Partner's language identifier.
    pub language: String,
    /// Which slot the code came from.
    pub sender: SwapSender,
}

/// Slot label attached to swapped code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapSender {
    /// The session creator's slot.
    Player1,
    /// The joiner's slot.
    Player2,
}

impl SwapSender {
    /// Label for the given slot index.
    pub fn for_slot(slot: usize) -> Self {
        if slot == 0 {
            SwapSender::Player1
        } else {
            SwapSender::Player2
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Deserialize from a binary frame holding JSON text.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        Self::from_json(std::str::from_utf8(data)?)
    }
}

impl ServerMessage {
    /// Build an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
