//! The single event loop that owns every registry.
//!
//! ```text
//! connection tasks ──HubCommand──► ┌──────────────────────────────┐
//!                                  │ Hub (one task)               │
//!   hydration task ──Hydrated────► │  RoomStore   UserDirectory   │
//!                                  │  sessions    Fanout          │
//!                                  └──────┬───────────────┬───────┘
//!                                         │ try_send      │ fire-and-forget
//!                                         ▼               ▼
//!                                  per-connection     MirrorHandle
//!                                  outboxes
//! ```
//!
//! Commands are handled one at a time in arrival order and each handler
//! runs to completion without awaiting, so a room is never mutated by two
//! handlers at once. The only suspension point, the mirror lookup a join
//! may need, runs in its own task and re-enters the loop as
//! [`HubCommand::Hydrated`].

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::Fanout;
use crate::directory::UserDirectory;
use crate::error::{SyncError, ALREADY_IN_ROOM, CREATE_FAILED, JOIN_FAILED, NOT_IN_ROOM};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::room_id::{RoomId, RoomIdGenerator};
use crate::session::{MembershipPolicy, Outbox, Session};
use crate::storage::{MirrorHandle, MirrorStatus};
use crate::store::{Departure, RoomSnapshot, RoomStore};
use crate::user::{validate_username, ConnectionId, User};

/// Messages processed by the hub loop.
pub enum HubCommand {
    Connect {
        conn: ConnectionId,
        outbox: Outbox,
    },
    Inbound {
        conn: ConnectionId,
        event: InboundEvent,
    },
    /// Continuation of a join that had to ask the mirror first.
    Hydrated {
        conn: ConnectionId,
        room_id: RoomId,
        username: String,
        content: Option<String>,
    },
    Disconnect {
        conn: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<ServerStats>,
    },
    Lookup {
        room_id: RoomId,
        reply: oneshot::Sender<Option<RoomSnapshot>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Commands buffered before connection readers wait.
    pub command_capacity: usize,
    pub membership_policy: MembershipPolicy,
    /// Seed for room codes and palettes. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            membership_policy: MembershipPolicy::Open,
            seed: None,
        }
    }
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub active_rooms: usize,
    pub connected_users: usize,
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_messages: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub mirror: MirrorStatus,
}

pub struct Hub {
    store: RoomStore,
    directory: UserDirectory,
    sessions: HashMap<ConnectionId, Session>,
    fanout: Fanout,
    mirror: MirrorHandle,
    policy: MembershipPolicy,
    rng: StdRng,
    commands: mpsc::WeakSender<HubCommand>,
    total_connections: u64,
    total_messages: u64,
}

impl Hub {
    pub fn new(
        config: &HubConfig,
        mirror: MirrorHandle,
        commands: mpsc::WeakSender<HubCommand>,
    ) -> Self {
        let (ids, rng) = match config.seed {
            Some(seed) => (RoomIdGenerator::seeded(seed), StdRng::seed_from_u64(seed ^ 0x5eed)),
            None => (RoomIdGenerator::new(), StdRng::from_os_rng()),
        };
        Self {
            store: RoomStore::with_generator(ids),
            directory: UserDirectory::new(),
            sessions: HashMap::new(),
            fanout: Fanout::new(),
            mirror,
            policy: config.membership_policy,
            rng,
            commands,
            total_connections: 0,
            total_messages: 0,
        }
    }

    /// Start the loop on the current runtime.
    pub fn spawn(config: HubConfig, mirror: MirrorHandle) -> HubHandle {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let hub = Hub::new(&config, mirror.clone(), tx.downgrade());
        tokio::spawn(hub.run(rx));
        HubHandle {
            commands: tx,
            mirror,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        log::info!("Hub started (policy: {:?})", self.policy);
        while let Some(cmd) = rx.recv().await {
            if self.handle(cmd).is_break() {
                break;
            }
        }
        log::info!("Hub stopped");
    }

    /// Apply one command. Never awaits.
    pub fn handle(&mut self, cmd: HubCommand) -> ControlFlow<()> {
        match cmd {
            HubCommand::Connect { conn, outbox } => {
                self.sessions.insert(conn, Session::new(conn, outbox));
                self.total_connections += 1;
                log::debug!("User connected: {conn}");
            }
            HubCommand::Inbound { conn, event } => {
                self.total_messages += 1;
                self.on_inbound(conn, event);
            }
            HubCommand::Hydrated {
                conn,
                room_id,
                username,
                content,
            } => self.on_hydrated(conn, room_id, username, content),
            HubCommand::Disconnect { conn } => self.on_disconnect(conn),
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubCommand::Lookup { room_id, reply } => {
                let _ = reply.send(self.store.snapshot(&room_id));
            }
            HubCommand::Shutdown { done } => {
                self.clear();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_inbound(&mut self, conn: ConnectionId, event: InboundEvent) {
        if !self.sessions.contains_key(&conn) {
            log::debug!("Dropping {} from unknown connection {conn}", event.name());
            return;
        }
        match event {
            InboundEvent::CreateRoom { username } => self.on_create_room(conn, &username),
            InboundEvent::JoinRoom { room_id, username } => {
                self.on_join_room(conn, &room_id, &username)
            }
            InboundEvent::TextChange {
                room_id,
                content,
                username,
            } => self.on_text_change(conn, &room_id, content, username),
            InboundEvent::CursorPosition {
                room_id,
                position,
                username,
            } => self.on_cursor_position(conn, &room_id, position, username),
        }
    }

    fn on_create_room(&mut self, conn: ConnectionId, username: &str) {
        let username = match validate_username(username) {
            Ok(name) => name,
            Err(e) => return self.reject(conn, &e, CREATE_FAILED),
        };

        let room_id = self.store.create_room();
        self.mirror.upsert_room(&room_id, "");
        log::info!("Room {room_id} created by {username}");
        self.fanout
            .to_caller(&self.sessions, conn, OutboundEvent::RoomCreated { room_id });
    }

    fn on_join_room(&mut self, conn: ConnectionId, raw_room_id: &str, username: &str) {
        let validated = validate_username(username)
            .and_then(|name| RoomId::parse(raw_room_id).map(|id| (id, name)));
        let (room_id, username) = match validated {
            Ok(pair) => pair,
            Err(e) => return self.reject(conn, &e, JOIN_FAILED),
        };

        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if !session.is_unbound() {
            let err = SyncError::validation(ALREADY_IN_ROOM);
            return self.reject(conn, &err, JOIN_FAILED);
        }

        if self.store.contains(&room_id) || !self.mirror.is_enabled() {
            self.complete_join(conn, room_id, username, None);
            return;
        }

        session.begin_join(room_id.clone());
        let mirror = self.mirror.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let content = mirror.find_room(&room_id).await.map(|found| found.content);
            if let Some(commands) = commands.upgrade() {
                let _ = commands
                    .send(HubCommand::Hydrated {
                        conn,
                        room_id,
                        username,
                        content,
                    })
                    .await;
            }
        });
    }

    fn on_hydrated(
        &mut self,
        conn: ConnectionId,
        room_id: RoomId,
        username: String,
        content: Option<String>,
    ) {
        let pending = self
            .sessions
            .get(&conn)
            .is_some_and(|session| session.is_joining(&room_id));
        if !pending {
            log::debug!("Discarding hydration of {room_id} for departed {conn}");
            return;
        }
        if content.is_some() {
            log::info!("Room {room_id} hydrated from mirror");
        }
        self.complete_join(conn, room_id, username, content);
    }

    fn complete_join(
        &mut self,
        conn: ConnectionId,
        room_id: RoomId,
        username: String,
        hydrated: Option<String>,
    ) {
        let user = User::new(conn, username, room_id.clone(), &mut self.rng);
        let snapshot = self.store.join_room(&room_id, user.clone(), hydrated);
        self.directory.register(conn, user.clone());
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.bind(room_id.clone());
        }
        self.mirror.add_member(&room_id, &user);
        log::info!("{} joined room {room_id}", user.username);

        self.fanout.to_caller(
            &self.sessions,
            conn,
            OutboundEvent::RoomJoined {
                room_id: room_id.clone(),
                content: snapshot.content,
                user: user.clone(),
            },
        );
        self.broadcast(&room_id, Some(conn), OutboundEvent::UserJoined(user));
        self.broadcast(&room_id, None, OutboundEvent::UsersUpdate(snapshot.members));
    }

    fn on_text_change(
        &mut self,
        conn: ConnectionId,
        raw_room_id: &str,
        content: String,
        username: String,
    ) {
        let (room_id, username) = match self.authorize(conn, raw_room_id, username) {
            Ok(target) => target,
            Err(e) => return self.reject(conn, &e, NOT_IN_ROOM),
        };

        if self.store.set_content(&room_id, content.clone()) {
            self.mirror.upsert_room(&room_id, &content);
        } else {
            // Not live here; refresh the mirror's copy if it has one.
            self.mirror.update_room(&room_id, &content);
        }
        let delivered = self.broadcast(
            &room_id,
            Some(conn),
            OutboundEvent::TextChanged { content, username },
        );
        log::trace!("text-change in {room_id} forwarded to {delivered} peers");
    }

    fn on_cursor_position(
        &mut self,
        conn: ConnectionId,
        raw_room_id: &str,
        position: usize,
        username: String,
    ) {
        let (room_id, username) = match self.authorize(conn, raw_room_id, username) {
            Ok(target) => target,
            Err(e) => return self.reject(conn, &e, NOT_IN_ROOM),
        };

        self.broadcast(
            &room_id,
            Some(conn),
            OutboundEvent::CursorUpdate {
                position,
                username,
                user_id: conn,
            },
        );
    }

    /// Resolve the room and author name for a bound-only event.
    ///
    /// Under [`MembershipPolicy::Open`] the caller's claims are taken as
    /// given. Under `Strict` the caller must be a member of the addressed
    /// room and its registered username is used.
    fn authorize(
        &self,
        conn: ConnectionId,
        raw_room_id: &str,
        username: String,
    ) -> Result<(RoomId, String), SyncError> {
        let room_id = RoomId::parse(raw_room_id)?;
        match self.policy {
            MembershipPolicy::Open => Ok((room_id, username)),
            MembershipPolicy::Strict => {
                let bound = self
                    .sessions
                    .get(&conn)
                    .and_then(Session::bound_room)
                    .is_some_and(|bound| *bound == room_id);
                match self.directory.lookup(conn) {
                    Some(user) if bound => Ok((room_id, user.username.clone())),
                    _ => Err(SyncError::validation(NOT_IN_ROOM)),
                }
            }
        }
    }

    fn on_disconnect(&mut self, conn: ConnectionId) {
        if self.sessions.remove(&conn).is_none() {
            return;
        }
        let Some(user) = self.directory.unregister(conn) else {
            log::debug!("User disconnected: {conn}");
            return;
        };

        let room_id = user.room_id.clone();
        let departure = self.store.leave_room(&room_id, conn);
        self.mirror.remove_member(&room_id, conn);
        log::info!("{} left room {room_id}", user.username);

        if let Departure::Remaining(members) = departure {
            self.broadcast(
                &room_id,
                Some(conn),
                OutboundEvent::UserLeft {
                    user_id: conn,
                    username: user.username,
                },
            );
            self.broadcast(&room_id, None, OutboundEvent::UsersUpdate(members));
        }
    }

    fn broadcast(
        &mut self,
        room_id: &RoomId,
        except: Option<ConnectionId>,
        event: OutboundEvent,
    ) -> usize {
        let Some(room) = self.store.room(room_id) else {
            return 0;
        };
        self.fanout
            .to_members(&self.sessions, room.member_ids(), except, event)
    }

    fn reject(&mut self, conn: ConnectionId, err: &SyncError, fallback: &str) {
        log::debug!("Rejected request from {conn}: {err}");
        let message = err.caller_message(fallback);
        self.fanout
            .to_caller(&self.sessions, conn, OutboundEvent::error(message));
    }

    pub fn stats(&self) -> ServerStats {
        let fanout = self.fanout.stats();
        ServerStats {
            active_rooms: self.store.room_count(),
            connected_users: self.directory.len(),
            active_connections: self.sessions.len(),
            total_connections: self.total_connections,
            total_messages: self.total_messages,
            messages_sent: fanout.messages_sent,
            messages_dropped: fanout.messages_dropped,
            mirror: self.mirror.status(),
        }
    }

    /// Drop every registry. Outboxes close, which ends their writers.
    fn clear(&mut self) {
        log::info!(
            "Clearing {} rooms and {} sessions",
            self.store.room_count(),
            self.sessions.len()
        );
        self.sessions.clear();
        self.directory.clear();
        self.store.clear();
    }
}

/// Cloneable entry point into a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    mirror: MirrorHandle,
}

impl HubHandle {
    /// Register a new connection whose events are queued on `outbox`.
    pub async fn connect(&self, outbox: Outbox) -> Result<ConnectionId, SyncError> {
        let conn = ConnectionId::new();
        self.send(HubCommand::Connect { conn, outbox }).await?;
        Ok(conn)
    }

    /// Connect with a fresh outbox of `capacity` events.
    pub async fn open_session(
        &self,
        capacity: usize,
    ) -> Result<(ConnectionId, mpsc::Receiver<Arc<OutboundEvent>>), SyncError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = self.connect(tx).await?;
        Ok((conn, rx))
    }

    pub async fn dispatch(&self, conn: ConnectionId, event: InboundEvent) -> Result<(), SyncError> {
        self.send(HubCommand::Inbound { conn, event }).await
    }

    /// Tear a connection down. Safe to call more than once.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let _ = self.send(HubCommand::Disconnect { conn }).await;
    }

    pub async fn stats(&self) -> Result<ServerStats, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| hub_stopped())
    }

    /// Current content and members of a room: live state if the room is
    /// live, otherwise whatever the mirror remembers.
    pub async fn room(&self, room_id: &RoomId) -> Result<Option<RoomSnapshot>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Lookup {
            room_id: room_id.clone(),
            reply,
        })
        .await?;
        if let Some(live) = rx.await.map_err(|_| hub_stopped())? {
            return Ok(Some(live));
        }

        Ok(self.mirror.find_room(room_id).await.map(|found| RoomSnapshot {
            room_id: found.room_id,
            content: found.content,
            members: found.users,
        }))
    }

    /// Clear every registry and stop the loop. Idempotent.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(HubCommand::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), SyncError> {
        self.commands.send(cmd).await.map_err(|_| hub_stopped())
    }
}

fn hub_stopped() -> SyncError {
    SyncError::internal("hub stopped")
}
