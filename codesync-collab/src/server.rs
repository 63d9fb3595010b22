//! WebSocket relay server with room-scoped fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!            ├── /ws/{room_id} ── RoomRegistry ── BroadcastEngine
//! Client B ──┘                         │
//!                                      └── SnapshotStore (RocksDB)
//! ```
//!
//! One task per connection; each connection owns a writer task fed by an
//! unbounded queue so broadcasts from other connections never touch a
//! foreign socket directly. The room id comes from the upgrade request
//! path, `/ws/{room_id}`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::engine::BroadcastEngine;
use crate::registry::{ConnectionHandle, RoomRegistry};
use crate::rooms::RoomIdAllocator;
use crate::storage::{SnapshotStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Directory for the durable snapshot store
    pub data_dir: PathBuf,
    /// Optional per-room connection cap (None = unlimited)
    pub max_clients_per_room: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            data_dir: PathBuf::from("codesync_data"),
            max_clients_per_room: None,
        }
    }
}

impl ServerConfig {
    /// Read overrides from the environment: `CODESYNC_BIND_ADDR`,
    /// `CODESYNC_DATA_DIR`, `CODESYNC_MAX_CLIENTS_PER_ROOM`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CODESYNC_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("CODESYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(cap) = std::env::var("CODESYNC_MAX_CLIENTS_PER_ROOM") {
            match cap.parse::<usize>() {
                Ok(n) => config.max_clients_per_room = Some(n),
                Err(_) => log::warn!("ignoring unparseable CODESYNC_MAX_CLIENTS_PER_ROOM={cap}"),
            }
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    store: Arc<SnapshotStore>,
    engine: Arc<BroadcastEngine>,
    allocator: RoomIdAllocator,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    /// Open the snapshot store and assemble the server.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = Arc::new(SnapshotStore::open(StoreConfig {
            path: config.data_dir.clone(),
            ..StoreConfig::default()
        })?);
        let registry = Arc::new(RoomRegistry::new(config.max_clients_per_room));
        let engine = Arc::new(BroadcastEngine::new(registry.clone(), store.clone()));
        let allocator = RoomIdAllocator::new(store.clone());

        Ok(Self {
            config,
            registry,
            store,
            engine,
            allocator,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Run the accept loop. Does not return under normal operation.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("codesync relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let engine = self.engine.clone();
            let registry = self.registry.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, registry, stats).await
                {
                    log::warn!("connection from {addr} ended with error: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection for its whole lifetime.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<BroadcastEngine>,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Pull the room id out of the upgrade request path; anything but
        // /ws/{room_id} is refused during the handshake.
        let mut room_id = None;
        let callback = |req: &Request, resp: Response| match room_id_from_path(req.uri().path()) {
            Some(id) => {
                room_id = Some(id);
                Ok(resp)
            }
            None => Err(not_found_response()),
        };
        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                log::debug!("handshake with {addr} failed: {e}");
                return Ok(());
            }
        };
        let Some(room_id) = room_id else {
            return Ok(());
        };

        log::info!("websocket established from {addr} for room {room_id}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Writer task: everything addressed to this client goes through
        // one queue, in queue order.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let handle = ConnectionHandle::new(out_tx);

        if !engine.attach(&room_id, &handle).await {
            handle.send_raw(Message::Close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: "room is full".into(),
            })));
            drop(handle);
            let _ = writer.await;
            let mut s = stats.write().await;
            s.active_connections -= 1;
            return Ok(());
        }

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    {
                        let mut s = stats.write().await;
                        s.total_messages += 1;
                    }
                    engine.handle_message(&room_id, &handle, text.as_str()).await;
                }
                Ok(Message::Ping(data)) => {
                    handle.send_raw(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("connection {} closed by client", handle.conn_id());
                    break;
                }
                Ok(Message::Binary(_)) => {
                    // Not part of the protocol; same treatment as any other
                    // unrecognized input.
                    log::debug!("ignoring binary frame from {}", handle.conn_id());
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("websocket error from {addr}: {e}");
                    break;
                }
            }
        }

        engine.detach(&room_id, &handle).await;
        drop(handle);
        let _ = writer.await;

        let active_rooms = registry.room_count().await;
        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = active_rooms;

        Ok(())
    }

    /// Allocate a room and durably create its empty record. The HTTP
    /// layer in front of this crate exposes this as its room-creation
    /// endpoint.
    pub fn create_room(&self) -> Result<String, StoreError> {
        self.allocator.allocate()
    }

    /// Current snapshot of a room; `None` when it was never created.
    /// Backs the room-lookup endpoint.
    pub fn room_code(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        self.store.load_code(room_id)
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the membership registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get the snapshot store.
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}

/// Extract the room id from a `/ws/{room_id}` request path.
fn room_id_from_path(path: &str) -> Option<String> {
    let room = path.strip_prefix("/ws/")?.trim_end_matches('/');
    if room.is_empty() || room.contains('/') {
        return None;
    }
    Some(room.to_string())
}

fn not_found_response() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("not found".to_string()));
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp
}
