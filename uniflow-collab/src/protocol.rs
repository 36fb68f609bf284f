//! JSON event protocol spoken over each WebSocket connection.
//!
//! Every frame carries one named event:
//! ```text
//! { "event": "join-room", "data": { "roomId": "ABC123", "username": "Alice" } }
//! ```
//!
//! | Inbound (client → server) | Outbound (server → clients) |
//! |---------------------------|-----------------------------|
//! | `create-room`             | `room-created`              |
//! | `join-room`               | `room-joined`               |
//! | `text-change`             | `user-joined`               |
//! | `cursor-position`         | `users-update`              |
//! |                           | `text-changed`              |
//! |                           | `cursor-update`             |
//! |                           | `user-left`                 |
//! |                           | `error`                     |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::room_id::RoomId;
use crate::user::{ConnectionId, User};

/// Actions a participant sends to the server.
///
/// Missing string fields decode as empty so they fail validation with a
/// readable message instead of being rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    CreateRoom {
        #[serde(default)]
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    TextChange {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    CursorPosition {
        #[serde(default)]
        room_id: String,
        /// Character offset of the caret in the document.
        position: usize,
        #[serde(default)]
        username: String,
    },
}

impl InboundEvent {
    pub fn create_room(username: impl Into<String>) -> Self {
        Self::CreateRoom {
            username: username.into(),
        }
    }

    pub fn join_room(room_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::JoinRoom {
            room_id: room_id.into(),
            username: username.into(),
        }
    }

    pub fn text_change(
        room_id: impl Into<String>,
        content: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self::TextChange {
            room_id: room_id.into(),
            content: content.into(),
            username: username.into(),
        }
    }

    pub fn cursor_position(
        room_id: impl Into<String>,
        position: usize,
        username: impl Into<String>,
    ) -> Self {
        Self::CursorPosition {
            room_id: room_id.into(),
            position,
            username: username.into(),
        }
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::TextChange { .. } => "text-change",
            Self::CursorPosition { .. } => "cursor-position",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Events the server emits to one or more participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: RoomId,
        content: String,
        user: User,
    },
    UserJoined(User),
    UsersUpdate(Vec<User>),
    TextChanged { content: String, username: String },
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        position: usize,
        username: String,
        user_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: ConnectionId,
        username: String,
    },
    Error { message: String },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "room-created",
            Self::RoomJoined { .. } => "room-joined",
            Self::UserJoined(_) => "user-joined",
            Self::UsersUpdate(_) => "users-update",
            Self::TextChanged { .. } => "text-changed",
            Self::CursorUpdate { .. } => "cursor-update",
            Self::UserLeft { .. } => "user-left",
            Self::Error { .. } => "error",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("WebSocket error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ProtocolError::Transport(e.to_string())
    }
}
