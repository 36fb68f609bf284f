//! Per-connection session state.
//!
//! ```text
//!            join-room              mirror answered
//! Unbound ─────────────► Joining ─────────────────► Bound
//!    │  (room live or no mirror)                     │
//!    └───────────────────────────────────────────────┘
//!                         disconnect tears the session down
//! ```
//!
//! A session never leaves a room while staying connected; leaving and
//! disconnecting are the same terminal action.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::OutboundEvent;
use crate::room_id::RoomId;
use crate::user::ConnectionId;

/// Outbound queue feeding one connection's writer.
pub type Outbox = mpsc::Sender<Arc<OutboundEvent>>;

/// Where a connection stands in the join protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not a member of any room.
    Unbound,
    /// Join accepted, waiting for the mirror to say what the room held.
    Joining { room_id: RoomId },
    /// Member of exactly one room.
    Bound { room_id: RoomId },
}

/// Whether `text-change` / `cursor-position` must address the caller's own
/// room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipPolicy {
    /// Anyone holding a room code may act in it.
    #[default]
    Open,
    /// Bound-only events must come from a member of the addressed room.
    Strict,
}

/// Outcome of queueing an event for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The connection's queue was full; the event was dropped.
    Dropped,
    /// The connection is gone; emitting is a no-op.
    Closed,
}

pub struct Session {
    id: ConnectionId,
    outbox: Outbox,
    state: SessionState,
}

impl Session {
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            state: SessionState::Unbound,
        }
    }

    pub fn is_unbound(&self) -> bool {
        self.state == SessionState::Unbound
    }

    /// Room this session is a member of, if bound.
    pub fn bound_room(&self) -> Option<&RoomId> {
        match &self.state {
            SessionState::Bound { room_id } => Some(room_id),
            _ => None,
        }
    }

    pub fn begin_join(&mut self, room_id: RoomId) {
        self.state = SessionState::Joining { room_id };
    }

    /// True if a join for `room_id` is in flight.
    pub fn is_joining(&self, room_id: &RoomId) -> bool {
        matches!(&self.state, SessionState::Joining { room_id: pending } if pending == room_id)
    }

    pub fn bind(&mut self, room_id: RoomId) {
        self.state = SessionState::Bound { room_id };
    }

    /// Queue an event without waiting.
    ///
    /// The event loop must never stall on a slow reader, so a full queue
    /// drops the event instead of applying backpressure.
    pub fn emit(&self, event: Arc<OutboundEvent>) -> Delivery {
        match self.outbox.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(event)) => {
                log::warn!("Outbox full for {}; dropped {}", self.id, event.name());
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
