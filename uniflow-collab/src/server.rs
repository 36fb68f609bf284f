//! WebSocket front end for the hub.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌──► outbox A ──► writer A
//!             ├── connection task ───┤
//! Client B ──┘   (decode, forward)   │   Hub ──────► MirrorHandle
//!                        │           └──► outbox B ──► writer B
//!                        └── HubCommand ──► Hub
//! ```
//!
//! Each connection gets one task that decodes JSON frames into
//! [`InboundEvent`]s, forwards them to the hub and writes whatever the hub
//! queues on the connection's outbox. Leaving the loop for any reason
//! (close frame, socket error, hub shutdown) disconnects the session.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::MALFORMED_MESSAGE;
use crate::hub::{Hub, HubConfig, HubHandle};
use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};
use crate::session::MembershipPolicy;
use crate::storage::{
    MemoryMirror, MirrorConfig, MirrorError, MirrorHandle, MirrorQueueConfig, PersistenceMirror,
    RocksMirror, DEFAULT_MIRROR_TTL, DEFAULT_PURGE_INTERVAL,
};
use crate::user::ConnectionId;

/// Where room state is mirrored.
#[derive(Clone, Default)]
pub enum MirrorBackend {
    /// No mirror; rooms vanish with their last member.
    #[default]
    Disabled,
    /// Process-local mirror.
    Memory { ttl: Duration },
    /// Durable RocksDB mirror.
    RocksDb(MirrorConfig),
    /// Caller-supplied backend.
    Shared(Arc<dyn PersistenceMirror>),
}

impl MirrorBackend {
    pub fn memory() -> Self {
        MirrorBackend::Memory {
            ttl: DEFAULT_MIRROR_TTL,
        }
    }
}

impl fmt::Debug for MirrorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorBackend::Disabled => f.write_str("Disabled"),
            MirrorBackend::Memory { ttl } => f.debug_struct("Memory").field("ttl", ttl).finish(),
            MirrorBackend::RocksDb(config) => f.debug_tuple("RocksDb").field(config).finish(),
            MirrorBackend::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Events queued per connection before new ones are dropped
    pub outbound_capacity: usize,
    /// Hub command queue capacity
    pub command_capacity: usize,
    /// Whether bound-only events must target the caller's own room
    pub membership_policy: MembershipPolicy,
    /// Mirror backend
    pub mirror: MirrorBackend,
    /// Pending mirror operations before writes are dropped
    pub mirror_queue_capacity: usize,
    /// Upper bound on a join-time mirror lookup
    pub mirror_read_timeout: Duration,
    /// Period of the mirror's expiry sweep (zero disables it)
    pub mirror_purge_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:10000".to_string(),
            outbound_capacity: 256,
            command_capacity: 1024,
            membership_policy: MembershipPolicy::Open,
            mirror: MirrorBackend::Disabled,
            mirror_queue_capacity: 1024,
            mirror_read_timeout: Duration::from_millis(500),
            mirror_purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Loopback config on an ephemeral port.
    pub fn local() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.command_capacity,
            membership_policy: self.membership_policy,
            seed: None,
        }
    }

    fn queue_config(&self) -> MirrorQueueConfig {
        MirrorQueueConfig {
            capacity: self.mirror_queue_capacity,
            read_timeout: self.mirror_read_timeout,
            purge_interval: Some(self.mirror_purge_interval),
        }
    }
}

/// Startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),
}

/// Open the configured mirror and start its worker.
pub fn open_mirror(config: &ServerConfig) -> Result<MirrorHandle, ServerError> {
    let backend: Arc<dyn PersistenceMirror> = match &config.mirror {
        MirrorBackend::Disabled => {
            log::info!("Room mirror disabled; using in-memory storage only");
            return Ok(MirrorHandle::disabled());
        }
        MirrorBackend::Memory { ttl } => {
            log::info!("Using process-local room mirror");
            Arc::new(MemoryMirror::with_ttl(*ttl))
        }
        MirrorBackend::RocksDb(mirror_config) => {
            let mirror = RocksMirror::open(mirror_config.clone())?;
            match mirror.purge_expired() {
                Ok(purged) => log::info!("Mirror ready ({purged} expired rooms purged)"),
                Err(e) => log::warn!("Mirror expiry sweep failed: {e}"),
            }
            Arc::new(mirror)
        }
        MirrorBackend::Shared(backend) => backend.clone(),
    };
    Ok(MirrorHandle::spawn(backend, config.queue_config()))
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    hub: HubHandle,
}

impl SyncServer {
    /// Open the mirror, start the hub and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let mirror = open_mirror(&config)?;
        let hub = Hub::spawn(config.hub_config(), mirror);
        log::info!("Sync server listening on {}", listener.local_addr()?);
        Ok(Self {
            config,
            listener,
            hub,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// `ws://` URL clients can connect to.
    pub fn url(&self) -> Result<String, ServerError> {
        Ok(format!("ws://{}", self.local_addr()?))
    }

    pub fn handle(&self) -> HubHandle {
        self.hub.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until the hub shuts down.
    pub async fn run(&self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Accept failed: {e}");
                    continue;
                }
            };
            if self.hub.is_closed() {
                log::info!("Hub stopped; no longer accepting connections");
                return Ok(());
            }
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let capacity = self.config.outbound_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Clear every registry and stop the hub.
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    outbound_capacity: usize,
) -> Result<(), ProtocolError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (outbox, mut outgoing) = mpsc::channel(outbound_capacity.max(1));
    let conn = hub
        .connect(outbox)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;
    log::info!("WebSocket connection {conn} established from {addr}");

    let result = loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let step = match msg {
                    Some(Ok(Message::Text(text))) => {
                        forward(conn, &hub, &mut ws_sender, text.as_str()).await
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => forward(conn, &hub, &mut ws_sender, text).await,
                        Err(_) => send_event(&mut ws_sender, &OutboundEvent::error(MALFORMED_MESSAGE)).await,
                    },
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await.map_err(ProtocolError::from)
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from {addr}: {e}");
                        break Ok(());
                    }
                    Some(Ok(_)) => Ok(()),
                };
                if let Err(e) = step {
                    break Err(e);
                }
            }
            event = outgoing.recv() => {
                let Some(event) = event else {
                    // Hub dropped the session.
                    break Ok(());
                };
                if let Err(e) = send_event(&mut ws_sender, &event).await {
                    break Err(e);
                }
            }
        }
    };

    hub.disconnect(conn).await;
    let _ = ws_sender.close().await;
    log::info!("Connection {conn} from {addr} closed");
    result
}

/// Decode one frame and hand it to the hub. Undecodable frames are answered
/// with an `error` event and otherwise ignored.
async fn forward<S>(
    conn: ConnectionId,
    hub: &HubHandle,
    sink: &mut S,
    text: &str,
) -> Result<(), ProtocolError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match InboundEvent::decode(text) {
        Ok(event) => {
            log::trace!("{conn} -> {}", event.name());
            hub.dispatch(conn, event)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)
        }
        Err(e) => {
            log::warn!("Failed to decode message from {conn}: {e}");
            send_event(sink, &OutboundEvent::error(MALFORMED_MESSAGE)).await
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &OutboundEvent) -> Result<(), ProtocolError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = event.encode()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MirrorStatus;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:10000");
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.command_capacity, 1024);
        assert_eq!(config.membership_policy, MembershipPolicy::Open);
        assert!(matches!(config.mirror, MirrorBackend::Disabled));
        assert_eq!(config.mirror_read_timeout, Duration::from_millis(500));
        assert_eq!(config.mirror_purge_interval, DEFAULT_PURGE_INTERVAL);
    }

    #[test]
    fn test_mirror_backend_debug() {
        assert_eq!(format!("{:?}", MirrorBackend::Disabled), "Disabled");
        let shared = MirrorBackend::Shared(Arc::new(MemoryMirror::new()));
        assert_eq!(format!("{shared:?}"), "Shared(..)");
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = SyncServer::bind(ServerConfig::local()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.url().unwrap().starts_with("ws://127.0.0.1:"));

        let stats = server.handle().stats().await.unwrap();
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.mirror, MirrorStatus::Disabled);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_memory_mirror() {
        let config = ServerConfig {
            mirror: MirrorBackend::memory(),
            ..ServerConfig::local()
        };
        let mirror = open_mirror(&config).unwrap();
        assert!(mirror.is_enabled());
        assert_eq!(mirror.status(), MirrorStatus::Connected);
    }

    #[tokio::test]
    async fn test_open_rocksdb_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            mirror: MirrorBackend::RocksDb(MirrorConfig::for_testing(dir.path().join("db"))),
            ..ServerConfig::local()
        };
        let mirror = open_mirror(&config).unwrap();
        assert_eq!(mirror.status(), MirrorStatus::Connected);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = ServerConfig {
            bind_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            SyncServer::bind(config).await,
            Err(ServerError::Io(_))
        ));
    }
}
