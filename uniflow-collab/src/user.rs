//! Participant identity: connection ids, user records and the cosmetic
//! palettes users are decorated with when they join.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, USERNAME_REQUIRED, USERNAME_TOO_LONG};
use crate::room_id::RoomId;

/// Maximum display name length, in characters.
pub const MAX_USERNAME_LEN: usize = 20;

/// Cursor/badge colors handed out at join time.
pub const USER_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

/// Avatars handed out at join time.
pub const USER_AVATARS: [&str; 8] = [
    "👤", "🧑‍💻", "👩‍💻", "🧑‍🎨", "👩‍🎨", "🧑‍🔬", "👩‍🔬", "🧑‍💼",
];

/// Opaque per-connection identity assigned by the transport layer.
///
/// Fresh for every connection and never reused while it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A participant as seen by the rest of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: ConnectionId,
    pub username: String,
    pub color: String,
    pub avatar: String,
    pub room_id: RoomId,
}

impl User {
    /// Build a user with a color and avatar picked uniformly at random.
    pub fn new(id: ConnectionId, username: String, room_id: RoomId, rng: &mut impl Rng) -> Self {
        let color = USER_COLORS[rng.random_range(0..USER_COLORS.len())];
        let avatar = USER_AVATARS[rng.random_range(0..USER_AVATARS.len())];
        Self {
            id,
            username,
            color: color.to_string(),
            avatar: avatar.to_string(),
            room_id,
        }
    }
}

/// Trim and validate a display name.
pub fn validate_username(raw: &str) -> Result<String, SyncError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::validation(USERNAME_REQUIRED));
    }
    if trimmed.chars().count() > MAX_USERNAME_LEN {
        return Err(SyncError::validation(USERNAME_TOO_LONG));
    }
    Ok(trimmed.to_string())
}
