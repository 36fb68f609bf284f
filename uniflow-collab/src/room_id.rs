//! Public room codes.
//!
//! A room is addressed by a six character code over `[A-Z0-9]`, e.g.
//! `ABC123`. Codes are drawn uniformly at random; collisions against the
//! live registry are handled by [`RoomStore`](crate::store::RoomStore)
//! retrying, not by the generator.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, ROOM_ID_REQUIRED};

/// Alphabet room codes are drawn from.
pub const ROOM_ID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of characters in a generated room code.
pub const ROOM_ID_LEN: usize = 6;

/// Normalized room identifier (trimmed, upper case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Normalize a caller-supplied room id.
    ///
    /// Any non-empty id is accepted; joining an id that was never generated
    /// simply creates that room.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyncError::validation(ROOM_ID_REQUIRED));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this id has the shape of a generated code.
    pub fn is_generated_shape(&self) -> bool {
        self.0.len() == ROOM_ID_LEN && self.0.bytes().all(|b| ROOM_ID_ALPHABET.contains(&b))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces random room codes. Not cryptographically secure.
pub struct RoomIdGenerator {
    rng: StdRng,
}

impl RoomIdGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic generator (for testing).
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self) -> RoomId {
        let code: String = (0..ROOM_ID_LEN)
            .map(|_| {
                let idx = self.rng.random_range(0..ROOM_ID_ALPHABET.len());
                ROOM_ID_ALPHABET[idx] as char
            })
            .collect();
        RoomId(code)
    }
}

impl Default for RoomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
