//! # codesync-collab — Real-time code collaboration relay
//!
//! Relays live text edits between browser clients sharing a room. Each room
//! has one durable snapshot; every edit is a full-snapshot replacement and
//! the last writer wins, both at the peers and in storage.
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                            ┌── Client B
//!            │    JSON over WebSocket     │
//!            └──────► CollabServer ◄──────┘
//!                         │
//!            ┌────────────┼────────────────┐
//!            ▼            ▼                ▼
//!     RoomRegistry  BroadcastEngine  SnapshotStore
//!     (membership)  (fan-out +       (RocksDB, one LZ4
//!                    write-through)   snapshot per room)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages (`init`, `code_update`)
//! - [`registry`] — room membership with per-connection fan-out handles
//! - [`engine`] — broadcast fan-out and fire-and-forget persistence
//! - [`server`] — WebSocket server, one task per connection
//! - [`rooms`] — human-readable room id allocation
//! - [`storage`] — durable snapshot store
//! - [`client`] — WebSocket client for joining a room
//! - [`suggest`] — stateless autocomplete hints

pub mod client;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod storage;
pub mod suggest;

// Re-exports for convenience
pub use client::{CollabClient, CollabEvent, ConnectionState};
pub use engine::BroadcastEngine;
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use registry::{ConnectionHandle, RoomRegistry};
pub use rooms::RoomIdAllocator;
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use storage::{RoomMetadata, SnapshotStore, StoreConfig, StoreError};
