//! RocksDB-backed persistent snapshot store.
//!
//! Column families:
//! - `snapshots` — current room code (LZ4 compressed), keyed by room id
//! - `metadata`  — per-room metadata (bincode: timestamps, revision, sizes)
//!
//! Each room holds exactly one snapshot. Snapshot and metadata always move
//! together in one atomic write batch.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Column family names.
const CF_SNAPSHOTS: &str = "snapshots";
const CF_METADATA: &str = "metadata";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_SNAPSHOTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codesync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-room metadata stored alongside the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMetadata {
    /// Room id this record belongs to
    pub room_id: String,
    /// Number of snapshot overwrites since creation
    pub revision: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Compressed snapshot size in bytes
    pub compressed_size: u64,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl RoomMetadata {
    fn new(room_id: &str) -> Self {
        let now = unix_now();
        Self {
            room_id: room_id.to_string(),
            revision: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Stored snapshot is not valid UTF-8
    CorruptSnapshot(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::CorruptSnapshot(e) => write!(f, "Corrupt snapshot: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed snapshot store.
///
/// Safe to call concurrently for different room ids; per-id writes
/// serialize through RocksDB's own write path.
pub struct SnapshotStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
    /// Serializes create_room's check-then-insert so two allocators can
    /// never both observe an id as free.
    create_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open the snapshot store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            create_lock: Mutex::new(()),
        })
    }

    /// Build column family options. Both families hold small values read
    /// by point lookup.
    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    /// Insert an empty snapshot record if the room has never been created.
    ///
    /// Returns whether a record was created; an existing room is left
    /// untouched (idempotent).
    pub fn create_room(&self, room_id: &str) -> Result<bool, StoreError> {
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.room_exists(room_id)? {
            return Ok(false);
        }
        self.write_record(room_id, "", RoomMetadata::new(room_id))?;
        Ok(true)
    }

    /// Load a room's snapshot.
    ///
    /// `None` means the room was never created; an empty room reads back
    /// as `Some("")`.
    pub fn load_code(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(compressed) => {
                let bytes = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::CompressionError(e.to_string()))?;
                let code = String::from_utf8(bytes)
                    .map_err(|e| StoreError::CorruptSnapshot(e.to_string()))?;
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }

    /// Overwrite a room's snapshot unconditionally.
    ///
    /// Creates the record if the room was never allocated — the write
    /// always lands, last writer wins. Bumps the revision counter and
    /// the updated-at timestamp.
    pub fn save_code(&self, room_id: &str, code: &str) -> Result<(), StoreError> {
        let mut meta = match self.metadata(room_id)? {
            Some(meta) => meta,
            None => RoomMetadata::new(room_id),
        };
        meta.revision += 1;
        meta.updated_at = unix_now();
        self.write_record(room_id, code, meta)
    }

    /// Check whether a room record exists.
    pub fn room_exists(&self, room_id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(&cf, room_id.as_bytes())?.is_some())
    }

    /// Load a room's metadata record.
    pub fn metadata(&self, room_id: &str) -> Result<Option<RoomMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => Ok(Some(RoomMetadata::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all room ids in the store.
    pub fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut room_ids = Vec::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            room_ids.push(id);
        }

        Ok(room_ids)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Atomically write snapshot + metadata for a room.
    fn write_record(
        &self,
        room_id: &str,
        code: &str,
        mut meta: RoomMetadata,
    ) -> Result<(), StoreError> {
        let cf_snap = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(code.as_bytes());
        meta.snapshot_size = code.len() as u64;
        meta.compressed_size = compressed.len() as u64;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snap, room_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, room_id.as_bytes(), &meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(())
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

/// Seconds since the Unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap()
    }

    #[test]
    fn test_store_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.path().exists());
    }

    #[test]
    fn test_create_room_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        assert!(!store.room_exists("cool-panda-42").unwrap());
        assert!(store.create_room("cool-panda-42").unwrap());
        assert!(store.room_exists("cool-panda-42").unwrap());
    }

    #[test]
    fn test_create_room_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.create_room("alpha").unwrap());
        assert!(!store.create_room("alpha").unwrap());
        assert_eq!(store.list_rooms().unwrap(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_absent_vs_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.load_code("never-created").unwrap(), None);

        store.create_room("alpha").unwrap();
        assert_eq!(store.load_code("alpha").unwrap(), Some(String::new()));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.create_room("alpha").unwrap();
        store.save_code("alpha", "print('hi')\n").unwrap();
        assert_eq!(
            store.load_code("alpha").unwrap(),
            Some("print('hi')\n".to_string())
        );
    }

    #[test]
    fn test_save_overwrites_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.create_room("alpha").unwrap();
        store.save_code("alpha", "x = 1").unwrap();
        store.save_code("alpha", "x = 2").unwrap();
        assert_eq!(store.load_code("alpha").unwrap(), Some("x = 2".to_string()));
    }

    #[test]
    fn test_save_without_create_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save_code("uninvited", "y = 3").unwrap();
        assert!(store.room_exists("uninvited").unwrap());
        assert_eq!(store.load_code("uninvited").unwrap(), Some("y = 3".to_string()));
    }

    #[test]
    fn test_metadata_tracks_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.create_room("alpha").unwrap();
        let meta = store.metadata("alpha").unwrap().unwrap();
        assert_eq!(meta.room_id, "alpha");
        assert_eq!(meta.revision, 0);
        assert_eq!(meta.snapshot_size, 0);
        assert!(meta.created_at > 0);

        store.save_code("alpha", "x = 1").unwrap();
        store.save_code("alpha", "x = 22").unwrap();
        let meta = store.metadata("alpha").unwrap().unwrap();
        assert_eq!(meta.revision, 2);
        assert_eq!(meta.snapshot_size, 6);
        assert!(meta.updated_at >= meta.created_at);
    }

    #[test]
    fn test_list_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        for id in ["alpha", "beta", "gamma"] {
            store.create_room(id).unwrap();
        }
        let mut rooms = store.list_rooms().unwrap();
        rooms.sort();
        assert_eq!(rooms, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_reopen_preserves_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.create_room("alpha").unwrap();
            store.save_code("alpha", "persisted = True").unwrap();
        }

        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(
            store.load_code("alpha").unwrap(),
            Some("persisted = True".to_string())
        );
        assert!(!store.create_room("alpha").unwrap());
    }

    #[test]
    fn test_large_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let code = "# comment line that repeats\n".repeat(10_000);
        store.save_code("alpha", &code).unwrap();
        assert_eq!(store.load_code("alpha").unwrap(), Some(code.clone()));

        // Repetitive text should compress well.
        let meta = store.metadata("alpha").unwrap().unwrap();
        assert!(meta.compressed_size < meta.snapshot_size / 2);
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("codesync_data"));
        assert_eq!(config.bloom_filter_bits, 10);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DatabaseError("boom".into());
        assert!(err.to_string().contains("Database error"));

        let err = StoreError::CorruptSnapshot("bad utf8".into());
        assert!(err.to_string().contains("Corrupt snapshot"));
    }
}
