//! Best-effort durable mirror of room content and membership.
//!
//! The live [`RoomStore`](crate::store::RoomStore) is authoritative. The
//! mirror is a write-through secondary that lets a room's text survive the
//! room being emptied or the process restarting. It is never on the response
//! path:
//!
//! ```text
//! Hub ──try_send──► MirrorOp queue ──► worker task ──spawn_blocking──► backend
//!  │                                                                    │
//!  └── hydration: find_room() awaited in a spawned task, bounded by a   │
//!      timeout; result re-enters the hub as a command  ◄────────────────┘
//! ```
//!
//! All operations go through one queue, so writes land in the order the hub
//! issued them and a hydration read observes every earlier write.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::error::SyncError;
use crate::room_id::RoomId;
use crate::user::{ConnectionId, User};

/// Inactivity window after which mirrored rooms expire.
pub const DEFAULT_MIRROR_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Period of the background expiry sweep.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Room as remembered by the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredRoom {
    pub room_id: RoomId,
    pub content: String,
    pub users: Vec<User>,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Seconds since the Unix epoch.
    pub last_activity: u64,
}

impl MirroredRoom {
    pub fn new(room_id: RoomId, now: u64) -> Self {
        Self {
            room_id,
            content: String::new(),
            users: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.last_activity) > ttl.as_secs()
    }

    /// Add or refresh a member record.
    pub fn upsert_user(&mut self, user: &User) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => self.users.push(user.clone()),
        }
    }
}

/// Current wall-clock time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Mirror errors. Never surfaced to participants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Mirror unavailable: {0}")]
    Unavailable(String),
}

/// Connectivity as reported on the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorStatus {
    Connected,
    Unavailable,
    Disabled,
}

/// Storage-layer contract consumed by the hub.
///
/// Implementations are blocking and are only ever called from the mirror
/// worker's blocking tasks. Entries must stop being returned once they have
/// been inactive for longer than the backend's TTL.
pub trait PersistenceMirror: Send + Sync + 'static {
    fn find_room(&self, room_id: &RoomId) -> Result<Option<MirroredRoom>, MirrorError>;

    /// Create the entry if absent and replace its content.
    fn upsert_room(&self, room_id: &RoomId, content: &str) -> Result<(), MirrorError>;

    /// Replace the content of an existing, unexpired entry. Never creates
    /// one. Returns whether an entry was updated.
    fn update_room(&self, room_id: &RoomId, content: &str) -> Result<bool, MirrorError>;

    /// Record a member, creating the entry if absent.
    fn add_member(&self, room_id: &RoomId, user: &User) -> Result<(), MirrorError>;

    fn remove_member(&self, room_id: &RoomId, user_id: ConnectionId) -> Result<(), MirrorError>;

    /// Delete every entry past its TTL, returning how many went.
    fn purge_expired(&self) -> Result<usize, MirrorError>;

    fn status(&self) -> MirrorStatus;
}

enum MirrorOp {
    Upsert {
        room_id: RoomId,
        content: String,
    },
    Update {
        room_id: RoomId,
        content: String,
    },
    AddMember {
        room_id: RoomId,
        user: User,
    },
    RemoveMember {
        room_id: RoomId,
        user_id: ConnectionId,
    },
    Find {
        room_id: RoomId,
        reply: oneshot::Sender<Result<Option<MirroredRoom>, MirrorError>>,
    },
    Purge,
}

impl MirrorOp {
    fn apply(self, backend: &dyn PersistenceMirror) {
        let (what, result) = match self {
            MirrorOp::Upsert { room_id, content } => (
                format!("upsert of {room_id}"),
                backend.upsert_room(&room_id, &content),
            ),
            MirrorOp::Update { room_id, content } => (
                format!("update of {room_id}"),
                backend.update_room(&room_id, &content).map(|updated| {
                    if !updated {
                        log::trace!("No mirrored entry for {room_id}; update skipped");
                    }
                }),
            ),
            MirrorOp::AddMember { room_id, user } => (
                format!("add member to {room_id}"),
                backend.add_member(&room_id, &user),
            ),
            MirrorOp::RemoveMember { room_id, user_id } => (
                format!("remove member from {room_id}"),
                backend.remove_member(&room_id, user_id),
            ),
            MirrorOp::Purge => (
                "expiry sweep".to_string(),
                backend.purge_expired().map(|purged| {
                    if purged > 0 {
                        log::info!("Mirror sweep dropped {purged} expired rooms");
                    }
                }),
            ),
            MirrorOp::Find { room_id, reply } => {
                let _ = reply.send(backend.find_room(&room_id));
                return;
            }
        };
        if let Err(e) = result {
            log::warn!("Mirror {what} failed: {}", SyncError::from(e));
        }
    }
}

/// Queue and timeout settings for the mirror worker.
#[derive(Debug, Clone)]
pub struct MirrorQueueConfig {
    /// Pending operations before new writes are dropped.
    pub capacity: usize,
    /// Upper bound on a hydration read.
    pub read_timeout: Duration,
    /// How often expired entries are swept. `None` leaves expiry to reads.
    pub purge_interval: Option<Duration>,
}

impl Default for MirrorQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            read_timeout: Duration::from_millis(500),
            purge_interval: Some(DEFAULT_PURGE_INTERVAL),
        }
    }
}

#[derive(Clone)]
struct MirrorInner {
    ops: mpsc::Sender<MirrorOp>,
    backend: Arc<dyn PersistenceMirror>,
    read_timeout: Duration,
}

/// Fire-and-forget front end to a [`PersistenceMirror`].
///
/// Cheap to clone. A disabled handle accepts every call and does nothing.
#[derive(Clone)]
pub struct MirrorHandle {
    inner: Option<MirrorInner>,
}

impl MirrorHandle {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Start the worker task for `backend`. Must be called inside a tokio
    /// runtime.
    pub fn spawn(backend: Arc<dyn PersistenceMirror>, config: MirrorQueueConfig) -> Self {
        let (ops, rx) = mpsc::channel(config.capacity.max(1));
        tokio::spawn(run_worker(backend.clone(), rx, config.purge_interval));
        Self {
            inner: Some(MirrorInner {
                ops,
                backend,
                read_timeout: config.read_timeout,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn status(&self) -> MirrorStatus {
        match &self.inner {
            Some(inner) => inner.backend.status(),
            None => MirrorStatus::Disabled,
        }
    }

    pub fn upsert_room(&self, room_id: &RoomId, content: &str) {
        self.enqueue(MirrorOp::Upsert {
            room_id: room_id.clone(),
            content: content.to_string(),
        });
    }

    /// Refresh the content of a room the mirror already holds.
    pub fn update_room(&self, room_id: &RoomId, content: &str) {
        self.enqueue(MirrorOp::Update {
            room_id: room_id.clone(),
            content: content.to_string(),
        });
    }

    pub fn add_member(&self, room_id: &RoomId, user: &User) {
        self.enqueue(MirrorOp::AddMember {
            room_id: room_id.clone(),
            user: user.clone(),
        });
    }

    pub fn remove_member(&self, room_id: &RoomId, user_id: ConnectionId) {
        self.enqueue(MirrorOp::RemoveMember {
            room_id: room_id.clone(),
            user_id,
        });
    }

    /// Look a room up, giving up after the configured timeout.
    ///
    /// Every failure mode (disabled, timeout, backend error) yields `None`.
    pub async fn find_room(&self, room_id: &RoomId) -> Option<MirroredRoom> {
        let inner = self.inner.as_ref()?;
        let (reply, rx) = oneshot::channel();
        let op = MirrorOp::Find {
            room_id: room_id.clone(),
            reply,
        };
        if inner.ops.send(op).await.is_err() {
            log::warn!("Mirror worker stopped; lookup of {room_id} skipped");
            return None;
        }

        match tokio::time::timeout(inner.read_timeout, rx).await {
            Ok(Ok(Ok(found))) => found,
            Ok(Ok(Err(e))) => {
                log::warn!("Mirror lookup failed for room {room_id}: {e}");
                None
            }
            Ok(Err(_)) => None,
            Err(_) => {
                log::warn!(
                    "Mirror lookup for room {room_id} timed out after {:?}",
                    inner.read_timeout
                );
                None
            }
        }
    }

    fn enqueue(&self, op: MirrorOp) {
        let Some(inner) = &self.inner else {
            return;
        };
        if let Err(e) = inner.ops.try_send(op) {
            log::warn!("Mirror queue rejected write: {e}");
        }
    }
}

async fn run_worker(
    backend: Arc<dyn PersistenceMirror>,
    mut rx: mpsc::Receiver<MirrorOp>,
    purge_interval: Option<Duration>,
) {
    let mut sweep = purge_interval.filter(|period| !period.is_zero()).map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let op = tokio::select! {
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
            _ = next_sweep(&mut sweep) => MirrorOp::Purge,
        };
        let backend = backend.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || op.apply(backend.as_ref())).await {
            log::error!("Mirror task panicked: {e}");
        }
    }
    log::debug!("Mirror worker stopped");
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryMirror;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn room(code: &str) -> RoomId {
        RoomId::parse(code).unwrap()
    }

    #[test]
    fn test_expiry_window() {
        let entry = MirroredRoom::new(room("EXP001"), 1_000);
        assert!(!entry.is_expired(1_000 + DEFAULT_MIRROR_TTL.as_secs(), DEFAULT_MIRROR_TTL));
        assert!(entry.is_expired(1_001 + DEFAULT_MIRROR_TTL.as_secs(), DEFAULT_MIRROR_TTL));
    }

    #[test]
    fn test_upsert_user_replaces_same_id() {
        let mut rng = StdRng::seed_from_u64(5);
        let id = room("USR001");
        let mut entry = MirroredRoom::new(id.clone(), 0);
        let mut alice = User::new(ConnectionId::new(), "Alice".into(), id, &mut rng);

        entry.upsert_user(&alice);
        alice.username = "Alicia".into();
        entry.upsert_user(&alice);

        assert_eq!(entry.users.len(), 1);
        assert_eq!(entry.users[0].username, "Alicia");
    }

    #[tokio::test]
    async fn test_disabled_handle_is_inert() {
        let handle = MirrorHandle::disabled();
        handle.upsert_room(&room("OFF001"), "ignored");
        assert!(!handle.is_enabled());
        assert_eq!(handle.status(), MirrorStatus::Disabled);
        assert!(handle.find_room(&room("OFF001")).await.is_none());
    }

    #[tokio::test]
    async fn test_reads_observe_earlier_writes() {
        let backend = Arc::new(MemoryMirror::new());
        let handle = MirrorHandle::spawn(backend.clone(), MirrorQueueConfig::default());
        let id = room("ORD001");

        handle.upsert_room(&id, "first");
        handle.upsert_room(&id, "second");

        let found = handle.find_room(&id).await.unwrap();
        assert_eq!(found.content, "second");
        assert_eq!(handle.status(), MirrorStatus::Connected);
    }

    #[tokio::test]
    async fn test_unavailable_backend_yields_none() {
        let backend = Arc::new(MemoryMirror::new());
        let handle = MirrorHandle::spawn(backend.clone(), MirrorQueueConfig::default());
        let id = room("DWN001");

        handle.upsert_room(&id, "kept");
        assert!(handle.find_room(&id).await.is_some());

        backend.set_available(false);
        handle.upsert_room(&id, "lost");
        assert!(handle.find_room(&id).await.is_none());
        assert_eq!(handle.status(), MirrorStatus::Unavailable);

        backend.set_available(true);
        assert_eq!(handle.find_room(&id).await.unwrap().content, "kept");
    }

    #[tokio::test]
    async fn test_background_sweep_reclaims_expired_rooms() {
        let backend = Arc::new(MemoryMirror::with_ttl(Duration::from_secs(1)));
        let config = MirrorQueueConfig {
            purge_interval: Some(Duration::from_millis(100)),
            ..MirrorQueueConfig::default()
        };
        let handle = MirrorHandle::spawn(backend.clone(), config);

        for i in 0..50 {
            handle.upsert_room(&room(&format!("SWP{i:03}")), "");
        }
        assert!(handle.find_room(&room("SWP000")).await.is_some());
        assert_eq!(backend.len(), 50);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !backend.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "{} rooms left after sweep", backend.len());
    }

    #[tokio::test]
    async fn test_update_skips_unknown_rooms() {
        let backend = Arc::new(MemoryMirror::new());
        let handle = MirrorHandle::spawn(backend.clone(), MirrorQueueConfig::default());

        handle.update_room(&room("UPD002"), "phantom");
        assert!(handle.find_room(&room("UPD002")).await.is_none());

        handle.upsert_room(&room("UPD003"), "");
        handle.update_room(&room("UPD003"), "typed");
        assert_eq!(handle.find_room(&room("UPD003")).await.unwrap().content, "typed");
        assert_eq!(backend.len(), 1);
    }
}
