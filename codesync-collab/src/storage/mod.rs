//! Durable room snapshots.
//!
//! ```text
//! ┌──────────────┐   save_code / load_code   ┌───────────────┐
//! │ CollabServer │ ────────────────────────► │ SnapshotStore │
//! │ (in-memory)  │                           │ (RocksDB)     │
//! └──────────────┘                           └──────┬────────┘
//!                                                   │ column families
//!                                                   ▼
//!                              ┌─────────────────────────────────────┐
//!                              │ CF "snapshots" — LZ4 room snapshots │
//!                              │ CF "metadata"  — room metadata      │
//!                              └─────────────────────────────────────┘
//! ```
//!
//! The store is the source of truth for a room's code; the in-process
//! layer only ever holds the in-flight copy. Writes are unconditional
//! overwrites — there is no optimistic-concurrency check, the last writer
//! wins.

pub mod rocks;

pub use rocks::{RoomMetadata, SnapshotStore, StoreConfig, StoreError};
