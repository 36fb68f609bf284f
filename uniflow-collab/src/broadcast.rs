//! Fan-out of outbound events to room members.
//!
//! Each event is wrapped in an `Arc` once and the same allocation is queued
//! on every recipient's outbox. Exclusion of the originator happens here, on
//! the server, so `text-changed` and `cursor-update` never echo back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::protocol::OutboundEvent;
use crate::session::{Delivery, Session};
use crate::user::ConnectionId;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

/// Routes events to sessions and keeps delivery counters.
#[derive(Debug, Default)]
pub struct Fanout {
    stats: BroadcastStats,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send to a single connection. Unknown connections are ignored.
    pub fn to_caller(
        &mut self,
        sessions: &HashMap<ConnectionId, Session>,
        caller: ConnectionId,
        event: OutboundEvent,
    ) {
        if let Some(session) = sessions.get(&caller) {
            let delivery = session.emit(Arc::new(event));
            self.record(delivery);
        }
    }

    /// Send to every listed member except `except`.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn to_members<'a>(
        &mut self,
        sessions: &HashMap<ConnectionId, Session>,
        members: impl IntoIterator<Item = &'a ConnectionId>,
        except: Option<ConnectionId>,
        event: OutboundEvent,
    ) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        for member in members {
            if Some(*member) == except {
                continue;
            }
            let Some(session) = sessions.get(member) else {
                continue;
            };
            let delivery = session.emit(event.clone());
            if delivery == Delivery::Sent {
                delivered += 1;
            }
            self.record(delivery);
        }
        delivered
    }

    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.stats.messages_sent += 1,
            Delivery::Dropped => self.stats.messages_dropped += 1,
            Delivery::Closed => {}
        }
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }
}
