//! Authoritative in-memory room registry.
//!
//! ```text
//! RoomStore
//!   └── RoomId ──► Room { content, members: ConnectionId → User, last_activity }
//! ```
//!
//! The store knows nothing about transports or mirrors. It is owned by the
//! hub's event loop, so every mutation runs to completion before the next
//! one starts and no locking is involved.
//!
//! Content follows last-writer-wins: [`RoomStore::set_content`] replaces the
//! whole document, and the last write applied for a room is what every later
//! joiner sees.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::room_id::{RoomId, RoomIdGenerator};
use crate::user::{ConnectionId, User};

/// Attempts made to find an id not already live before giving up and
/// using the last one drawn.
pub const MAX_ID_ATTEMPTS: usize = 10;

/// A single collaboration room.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    content: String,
    members: HashMap<ConnectionId, User>,
    created_at: SystemTime,
    last_activity: SystemTime,
}

impl Room {
    fn new(id: RoomId, content: String) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            content,
            members: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn members(&self) -> Vec<User> {
        self.members.values().cloned().collect()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.keys()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            content: self.content.clone(),
            members: self.members(),
        }
    }
}

/// Point-in-time copy of a room handed out to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub content: String,
    pub members: Vec<User>,
}

/// Result of removing a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The room or the member was not there; nothing changed.
    Absent,
    /// The member left; these users remain.
    Remaining(Vec<User>),
    /// The member was the last one; the room is gone.
    RoomClosed,
}

/// Live room table.
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    ids: RoomIdGenerator,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::with_generator(RoomIdGenerator::new())
    }

    pub fn with_generator(ids: RoomIdGenerator) -> Self {
        Self {
            rooms: HashMap::new(),
            ids,
        }
    }

    /// Allocate a fresh room with empty content and no members.
    ///
    /// Up to [`MAX_ID_ATTEMPTS`] ids are drawn; if every one collides the
    /// last draw is used anyway.
    pub fn create_room(&mut self) -> RoomId {
        let mut id = self.ids.generate();
        let mut attempts = 1;
        while self.rooms.contains_key(&id) && attempts < MAX_ID_ATTEMPTS {
            id = self.ids.generate();
            attempts += 1;
        }
        if self.rooms.contains_key(&id) {
            log::warn!("Room id {id} still collides after {attempts} attempts");
        }

        self.rooms.insert(id.clone(), Room::new(id.clone(), String::new()));
        id
    }

    /// Add `user` to `room_id`, creating the room if it is not live.
    ///
    /// `hydrated` seeds the content of a room created here (typically what
    /// the mirror still remembers); it is ignored when the room is live,
    /// since live content is always authoritative.
    pub fn join_room(&mut self, room_id: &RoomId, user: User, hydrated: Option<String>) -> RoomSnapshot {
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone(), hydrated.unwrap_or_default()));

        room.members.insert(user.id, user);
        room.touch();
        room.snapshot()
    }

    /// Remove a member, dropping the room once it is empty. Idempotent.
    pub fn leave_room(&mut self, room_id: &RoomId, user_id: ConnectionId) -> Departure {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Departure::Absent;
        };
        if room.members.remove(&user_id).is_none() {
            return Departure::Absent;
        }

        if room.members.is_empty() {
            let lived = room.created_at.elapsed().unwrap_or_default();
            self.rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty after {}s)", lived.as_secs());
            return Departure::RoomClosed;
        }

        room.touch();
        Departure::Remaining(room.members())
    }

    /// Replace a room's content wholesale.
    ///
    /// Returns `false` if the room is not live (nothing is stored).
    pub fn set_content(&mut self, room_id: &RoomId, content: String) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.content = content;
                room.touch();
                true
            }
            None => false,
        }
    }

    pub fn get_members(&self, room_id: &RoomId) -> Vec<User> {
        self.rooms.get(room_id).map(Room::members).unwrap_or_default()
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(Room::snapshot)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop every room (process shutdown).
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}
