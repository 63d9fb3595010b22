//! Room membership registry.
//!
//! Maps each room id to the set of live connections in it. Membership is
//! the one piece of shared mutable state in the system, so every operation
//! goes through a single `RwLock` over the whole map; no caller can observe
//! a partially updated member set. Broadcast callers take an owned snapshot
//! of the membership and send outside the lock.
//!
//! Invariant: a room id present in the map has at least one member. The
//! entry is deleted the instant the last member leaves, so "room is in the
//! registry" means "room has a live connection" — independent of whether
//! the room exists in durable storage.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Outbound handle for one live connection.
///
/// The transport itself stays with the connection task; the registry only
/// holds this sender so broadcasts from other connections can queue frames
/// onto the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    /// Wrap an outbound channel, assigning a fresh connection id.
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            outbound,
        }
    }

    /// This connection's id.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a text frame. Returns `false` when the connection's writer is
    /// gone; callers treat that as a skipped peer, not an error.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let text: String = text.into();
        self.outbound.send(Message::Text(text.into())).is_ok()
    }

    /// Queue a raw frame (close, pong).
    pub fn send_raw(&self, msg: Message) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

/// Room membership, keyed by room id.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Vec<ConnectionHandle>>>,
    max_clients_per_room: Option<usize>,
}

impl RoomRegistry {
    /// Create a registry. `max_clients_per_room` of `None` never refuses
    /// a registration.
    pub fn new(max_clients_per_room: Option<usize>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_clients_per_room,
        }
    }

    /// Add a connection to a room, creating the member set on first join.
    ///
    /// Returns `false` only when a configured per-room cap is already
    /// reached; the connection is then not registered at all.
    pub async fn register(&self, room_id: &str, handle: ConnectionHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(cap) = self.max_clients_per_room {
            if rooms.get(room_id).map_or(0, Vec::len) >= cap {
                return false;
            }
        }
        rooms.entry(room_id.to_string()).or_default().push(handle);
        true
    }

    /// Remove a connection from its room, deleting the room entry the
    /// moment the last member leaves. A no-op for connections that are
    /// already gone.
    pub async fn unregister(&self, room_id: &str, conn_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room_id) {
            members.retain(|m| m.conn_id != conn_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    /// Point-in-time snapshot of every member of a room except `conn_id`.
    pub async fn peers_excluding(&self, room_id: &str, conn_id: Uuid) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(members) => members
                .iter()
                .filter(|m| m.conn_id != conn_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Current member count of a room (0 when absent).
    pub async fn member_count(&self, room_id: &str) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, Vec::len)
    }

    /// Number of rooms with at least one live connection.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Ids of all rooms with live connections.
    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
