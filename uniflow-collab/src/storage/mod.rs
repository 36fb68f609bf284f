//! Persistence mirror for rooms.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  upsert / update / add   ┌──────────────┐
//! │ Hub         │ ───────────────────────► │ MirrorHandle │
//! │ (RoomStore) │ ◄─── find_room (async) ─ │ (worker)     │
//! └─────────────┘                          │ + TTL sweep  │
//!                                          └──────┬───────┘
//!                                                 │ spawn_blocking
//!                                 ┌───────────────┴───────────────┐
//!                                 ▼                               ▼
//!                          ┌─────────────┐                 ┌─────────────┐
//!                          │ MemoryMirror│                 │ RocksMirror │
//!                          │ (process)   │                 │ CF rooms    │
//!                          └─────────────┘                 │ CF content  │
//!                                                          └─────────────┘
//! ```

pub mod memory;
pub mod mirror;
pub mod rocks;

pub use memory::MemoryMirror;
pub use mirror::{
    MirrorError, MirrorHandle, MirrorQueueConfig, MirrorStatus, MirroredRoom, PersistenceMirror,
    DEFAULT_MIRROR_TTL, DEFAULT_PURGE_INTERVAL,
};
pub use rocks::{MirrorConfig, RocksMirror};
