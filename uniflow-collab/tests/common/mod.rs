//! Shared helpers for the integration tests.

#![allow(dead_code)]

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uniflow_collab::client::{SyncClient, SyncEvent};
use uniflow_collab::hub::HubHandle;
use uniflow_collab::protocol::OutboundEvent;
use uniflow_collab::room_id::RoomId;
use uniflow_collab::server::{ServerConfig, SyncServer};
use uniflow_collab::user::User;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub url: String,
    pub hub: HubHandle,
}

/// Start a server on a free loopback port.
pub async fn start_test_server(config: ServerConfig) -> TestServer {
    let server = SyncServer::bind(config).await.unwrap();
    let url = server.url().unwrap();
    let hub = server.handle();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    TestServer { url, hub }
}

pub async fn start_default_server() -> TestServer {
    start_test_server(ServerConfig::local()).await
}

/// Connect a client and consume its `Connected` event.
pub async fn connect(url: &str) -> (SyncClient, mpsc::Receiver<SyncEvent>) {
    let mut client = SyncClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    match timeout(EVENT_TIMEOUT, events.recv()).await {
        Ok(Some(SyncEvent::Connected)) => {}
        other => panic!("Expected Connected event, got {other:?}"),
    }
    (client, events)
}

/// Next server event, failing the test if none arrives in time.
pub async fn next_event(events: &mut mpsc::Receiver<SyncEvent>) -> OutboundEvent {
    match timeout(EVENT_TIMEOUT, events.recv()).await {
        Ok(Some(SyncEvent::Event(event))) => event,
        other => panic!("Expected server event, got {other:?}"),
    }
}

/// Assert nothing arrives within `window`.
pub async fn expect_silence(events: &mut mpsc::Receiver<SyncEvent>, window: Duration) {
    if let Ok(Some(event)) = timeout(window, events.recv()).await {
        panic!("Expected no event, got {event:?}");
    }
}

/// Create a room and return its code.
pub async fn create_room(
    client: &SyncClient,
    events: &mut mpsc::Receiver<SyncEvent>,
    username: &str,
) -> RoomId {
    client.create_room(username).await.unwrap();
    match next_event(events).await {
        OutboundEvent::RoomCreated { room_id } => room_id,
        other => panic!("Expected room-created, got {other:?}"),
    }
}

/// Join a room, returning the content and own user record from
/// `room-joined` after consuming the `users-update` that follows it.
pub async fn join_room(
    client: &SyncClient,
    events: &mut mpsc::Receiver<SyncEvent>,
    room_id: &str,
    username: &str,
) -> (String, User) {
    client.join_room(room_id, username).await.unwrap();
    let joined = match next_event(events).await {
        OutboundEvent::RoomJoined { content, user, .. } => (content, user),
        other => panic!("Expected room-joined, got {other:?}"),
    };
    match next_event(events).await {
        OutboundEvent::UsersUpdate(_) => {}
        other => panic!("Expected users-update, got {other:?}"),
    }
    joined
}

/// Poll the hub until `check` holds or the timeout elapses.
pub async fn wait_for_stats(
    hub: &HubHandle,
    check: impl Fn(&uniflow_collab::hub::ServerStats) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Ok(stats) = hub.stats().await {
            if check(&stats) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
