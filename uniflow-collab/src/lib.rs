//! # uniflow-collab: real-time room synchronization
//!
//! Participants create or join rooms addressed by short codes and share one
//! plain-text document per room. Edits replace the whole document
//! (last writer wins); cursor positions are relayed but never stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     JSON events     │ (per conn)  │
//! └─────────────┘                     └──────┬──────┘
//!                                            │ HubCommand
//!                                            ▼
//!                                     ┌─────────────┐
//!                                     │ Hub         │
//!                                     │ RoomStore   │
//!                                     │ UserDirectory│
//!                                     └──────┬──────┘
//!                                            │ best effort
//!                                            ▼
//!                                     ┌─────────────┐
//!                                     │ Mirror      │
//!                                     │ (RocksDB)   │
//!                                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events
//! - [`store`]: authoritative live room registry
//! - [`room_id`]: room codes and their generator
//! - [`directory`]: connection to user reverse index
//! - [`session`]: per-connection join state
//! - [`broadcast`]: fan-out with originator exclusion
//! - [`hub`]: the single event loop owning all of the above
//! - [`storage`]: best-effort persistence mirror
//! - [`server`]: WebSocket front end
//! - [`client`]: WebSocket client

pub mod broadcast;
pub mod client;
pub mod directory;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod room_id;
pub mod server;
pub mod session;
pub mod storage;
pub mod store;
pub mod user;

// Re-exports for convenience
pub use broadcast::{BroadcastStats, Fanout};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use directory::UserDirectory;
pub use error::SyncError;
pub use hub::{Hub, HubConfig, HubHandle, ServerStats};
pub use protocol::{InboundEvent, OutboundEvent, ProtocolError};
pub use room_id::{RoomId, RoomIdGenerator};
pub use server::{MirrorBackend, ServerConfig, ServerError, SyncServer};
pub use session::{MembershipPolicy, Session, SessionState};
pub use storage::{
    MemoryMirror, MirrorConfig, MirrorError, MirrorHandle, MirrorStatus, MirroredRoom,
    PersistenceMirror, RocksMirror,
};
pub use store::{Departure, Room, RoomSnapshot, RoomStore};
pub use user::{ConnectionId, User};
