//! Process-local mirror backend.
//!
//! Keeps mirrored rooms in a map for the lifetime of the process. Useful
//! when no database is configured but rooms should still remember their
//! text after everyone leaves, and as the mirror in tests. Availability can
//! be toggled to exercise the "mirror down" paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::mirror::{
    now_secs, MirrorError, MirrorStatus, MirroredRoom, PersistenceMirror, DEFAULT_MIRROR_TTL,
};
use crate::room_id::RoomId;
use crate::user::{ConnectionId, User};

pub struct MemoryMirror {
    rooms: Mutex<HashMap<RoomId, MirroredRoom>>,
    ttl: Duration,
    available: AtomicBool,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_MIRROR_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            ttl,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().map(|rooms| rooms.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry inactive for longer than the TTL as of `now`.
    pub fn purge_expired_at(&self, now: u64) -> Result<usize, MirrorError> {
        self.with_rooms(|rooms| {
            let before = rooms.len();
            rooms.retain(|_, room| !room.is_expired(now, self.ttl));
            before - rooms.len()
        })
    }

    fn check(&self) -> Result<(), MirrorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MirrorError::Unavailable("memory mirror offline".into()))
        }
    }

    fn with_rooms<T>(
        &self,
        f: impl FnOnce(&mut HashMap<RoomId, MirroredRoom>) -> T,
    ) -> Result<T, MirrorError> {
        self.check()?;
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| MirrorError::Database("memory mirror lock poisoned".into()))?;
        Ok(f(&mut rooms))
    }

    fn find_room_at(&self, room_id: &RoomId, now: u64) -> Result<Option<MirroredRoom>, MirrorError> {
        self.with_rooms(|rooms| match rooms.get(room_id) {
            Some(room) if room.is_expired(now, self.ttl) => {
                rooms.remove(room_id);
                None
            }
            other => other.cloned(),
        })
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceMirror for MemoryMirror {
    fn find_room(&self, room_id: &RoomId) -> Result<Option<MirroredRoom>, MirrorError> {
        self.find_room_at(room_id, now_secs())
    }

    fn upsert_room(&self, room_id: &RoomId, content: &str) -> Result<(), MirrorError> {
        let now = now_secs();
        self.with_rooms(|rooms| {
            let room = rooms
                .entry(room_id.clone())
                .or_insert_with(|| MirroredRoom::new(room_id.clone(), now));
            room.content = content.to_string();
            room.last_activity = now;
        })
    }

    fn update_room(&self, room_id: &RoomId, content: &str) -> Result<bool, MirrorError> {
        let now = now_secs();
        self.with_rooms(|rooms| match rooms.get_mut(room_id) {
            Some(room) if !room.is_expired(now, self.ttl) => {
                room.content = content.to_string();
                room.last_activity = now;
                true
            }
            _ => false,
        })
    }

    fn add_member(&self, room_id: &RoomId, user: &User) -> Result<(), MirrorError> {
        let now = now_secs();
        self.with_rooms(|rooms| {
            let room = rooms
                .entry(room_id.clone())
                .or_insert_with(|| MirroredRoom::new(room_id.clone(), now));
            room.upsert_user(user);
            room.last_activity = now;
        })
    }

    fn remove_member(&self, room_id: &RoomId, user_id: ConnectionId) -> Result<(), MirrorError> {
        let now = now_secs();
        self.with_rooms(|rooms| {
            if let Some(room) = rooms.get_mut(room_id) {
                room.users.retain(|u| u.id != user_id);
                room.last_activity = now;
            }
        })
    }

    fn purge_expired(&self) -> Result<usize, MirrorError> {
        self.purge_expired_at(now_secs())
    }

    fn status(&self) -> MirrorStatus {
        if self.available.load(Ordering::SeqCst) {
            MirrorStatus::Connected
        } else {
            MirrorStatus::Unavailable
        }
    }
}
