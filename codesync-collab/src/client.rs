//! WebSocket client for joining a room.
//!
//! Connects to `ws://host/ws/{room_id}`, surfaces server frames as
//! [`CollabEvent`]s through a take-once receiver, and ships full-snapshot
//! updates with [`CollabClient::send_update`]. This is the native
//! counterpart of the browser editor's socket hook.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabEvent {
    /// Connection established
    Connected,
    /// The room's snapshot, first frame after connecting
    Init { code: String },
    /// A peer replaced the room's code
    RemoteUpdate { code: String },
    /// Connection lost or closed
    Disconnected,
}

/// A room client.
pub struct CollabClient {
    room_id: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<CollabEvent>>,
    event_tx: mpsc::Sender<CollabEvent>,
}

impl CollabClient {
    /// Create a client for the given room and server URL
    /// (e.g. `ws://127.0.0.1:9090`).
    pub fn new(room_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room_id: room_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/ws/{}", self.server_url, self.room_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws, _)) => ws,
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket; when
        // the channel closes, say goodbye with a close frame.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(CollabEvent::Connected).await;

        // Reader task: decode server frames into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::parse(text.as_str()) {
                        Ok(ServerMessage::Init { code }) => {
                            let _ = event_tx.send(CollabEvent::Init { code }).await;
                        }
                        Ok(ServerMessage::CodeUpdate { code }) => {
                            let _ = event_tx.send(CollabEvent::RemoteUpdate { code }).await;
                        }
                        Err(e) => {
                            log::debug!("ignoring unrecognized server frame: {e}");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(CollabEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a full-snapshot update for the room.
    pub async fn send_update(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        let frame = ClientMessage::code_update(code).encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Close the connection. The reader task emits
    /// [`CollabEvent::Disconnected`] once the server acknowledges.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the room id this client joins.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CollabClient::new("cool-panda-42", "ws://localhost:9090");
        assert_eq!(client.room_id(), "cool-panda-42");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = CollabClient::new("cool-panda-42", "ws://localhost:9090");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_update_before_connect_fails() {
        let client = CollabClient::new("cool-panda-42", "ws://localhost:9090");
        assert!(client.send_update("x = 1").await.is_err());
    }

    #[tokio::test]
    async fn test_take_event_rx_once() {
        let mut client = CollabClient::new("cool-panda-42", "ws://localhost:9090");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_when_no_server() {
        let mut client = CollabClient::new("cool-panda-42", "ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
