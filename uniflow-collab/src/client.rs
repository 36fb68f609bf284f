//! WebSocket client for the room protocol.
//!
//! Drives a server the way an editor front end would: one connection, JSON
//! events out, decoded [`OutboundEvent`]s delivered on a channel. Used by
//! the integration tests and handy for load scripts.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Server sent an event
    Event(OutboundEvent),
    /// Connection lost
    Disconnected,
}

pub struct SyncClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match OutboundEvent::decode(text.as_str()) {
                    Ok(event) => {
                        if event_tx.send(SyncEvent::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    pub async fn send(&self, event: &InboundEvent) -> Result<(), ProtocolError> {
        self.send_raw(event.encode()?).await
    }

    /// Send a text frame as-is.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.push(Message::Text(text.into().into())).await
    }

    pub async fn create_room(&self, username: &str) -> Result<(), ProtocolError> {
        self.send(&InboundEvent::create_room(username)).await
    }

    pub async fn join_room(&self, room_id: &str, username: &str) -> Result<(), ProtocolError> {
        self.send(&InboundEvent::join_room(room_id, username)).await
    }

    pub async fn send_text(
        &self,
        room_id: &str,
        content: &str,
        username: &str,
    ) -> Result<(), ProtocolError> {
        self.send(&InboundEvent::text_change(room_id, content, username))
            .await
    }

    pub async fn send_cursor(
        &self,
        room_id: &str,
        position: usize,
        username: &str,
    ) -> Result<(), ProtocolError> {
        self.send(&InboundEvent::cursor_position(room_id, position, username))
            .await
    }

    /// Send a close frame. The server treats this as a disconnect.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        let result = self.push(Message::Close(None)).await;
        self.outgoing_tx = None;
        result
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn push(&self, msg: Message) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
