//! Broadcast engine: the per-connection state machine.
//!
//! Every connection moves `CONNECTING → ACTIVE → CLOSED`, driven by the
//! transport layer through three hooks:
//!
//! - [`BroadcastEngine::attach`]   — register, fetch the snapshot, queue
//!   the one `init` frame (CONNECTING → ACTIVE)
//! - [`BroadcastEngine::handle_message`] — relay an edit to the room's
//!   peers and schedule the durable write
//! - [`BroadcastEngine::detach`]   — unregister (ACTIVE → CLOSED)
//!
//! Relays for one connection go out in the order its edits arrived; no
//! ordering is promised across connections. The durable write is
//! dispatched as an independent task the read loop never awaits, so
//! storage latency cannot throttle live collaboration — the trade-off is
//! that a crash between relay and write loses the latest edit from
//! durable storage while peers already hold it in memory.

use std::sync::Arc;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionHandle, RoomRegistry};
use crate::storage::SnapshotStore;

/// Fans edits out to room peers and writes snapshots through to storage.
pub struct BroadcastEngine {
    registry: Arc<RoomRegistry>,
    store: Arc<SnapshotStore>,
}

impl BroadcastEngine {
    /// Create an engine over the given registry and store.
    pub fn new(registry: Arc<RoomRegistry>, store: Arc<SnapshotStore>) -> Self {
        Self { registry, store }
    }

    /// Bring a connection into a room.
    ///
    /// Registers it and queues the mandatory `init` frame ahead of any
    /// other traffic to this connection. Returns `false` when the room
    /// refused the registration; the caller must inform the client and
    /// close, never leaving the connection half-open. A store failure on
    /// the snapshot fetch degrades to an empty snapshot instead of
    /// refusing the connection.
    pub async fn attach(&self, room_id: &str, handle: &ConnectionHandle) -> bool {
        if !self.registry.register(room_id, handle.clone()).await {
            log::info!(
                "room {room_id} is full, refusing connection {}",
                handle.conn_id()
            );
            return false;
        }

        let code = match self.store.load_code(room_id) {
            Ok(code) => code.unwrap_or_default(),
            Err(e) => {
                log::error!("snapshot read failed for room {room_id}: {e}, starting empty");
                String::new()
            }
        };

        match ServerMessage::init(code).encode() {
            Ok(frame) => {
                handle.send_text(frame);
            }
            Err(e) => log::error!("failed to encode init frame for room {room_id}: {e}"),
        }

        log::info!("connection {} joined room {room_id}", handle.conn_id());
        true
    }

    /// Process one inbound frame from an active connection.
    ///
    /// A well-formed `code_update` is relayed verbatim to every other
    /// member and its snapshot write is scheduled without being awaited.
    /// Everything else is dropped and the connection keeps going.
    pub async fn handle_message(&self, room_id: &str, sender: &ConnectionHandle, text: &str) {
        match ClientMessage::parse(text) {
            ClientMessage::CodeUpdate { code } => {
                self.relay(room_id, sender, text).await;
                self.schedule_write(room_id, code);
            }
            ClientMessage::Unknown => {
                log::debug!(
                    "ignoring unrecognized frame from {} in room {room_id}",
                    sender.conn_id()
                );
            }
        }
    }

    /// Take a connection out of its room. Idempotent; nothing is relayed
    /// to or from the connection afterwards.
    pub async fn detach(&self, room_id: &str, handle: &ConnectionHandle) {
        self.registry.unregister(room_id, handle.conn_id()).await;
        log::info!("connection {} left room {room_id}", handle.conn_id());
    }

    /// Forward the raw frame to every other member, best effort: one dead
    /// peer never aborts delivery to the rest and is never surfaced to
    /// the sender.
    async fn relay(&self, room_id: &str, sender: &ConnectionHandle, text: &str) {
        for peer in self
            .registry
            .peers_excluding(room_id, sender.conn_id())
            .await
        {
            if !peer.send_text(text) {
                log::warn!(
                    "dropping relay to dead peer {} in room {room_id}",
                    peer.conn_id()
                );
            }
        }
    }

    /// Persist the new snapshot without coupling the read loop to storage
    /// latency. Failures are logged and swallowed: the peers already hold
    /// the update in memory, only the durable copy goes stale.
    fn schedule_write(&self, room_id: &str, code: String) {
        let store = Arc::clone(&self.store);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.save_code(&room_id, &code) {
                log::error!("snapshot write failed for room {room_id}: {e}");
            }
        });
    }

    /// The registry backing this engine.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// The store backing this engine.
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::tungstenite::Message;

    fn test_engine(dir: &tempfile::TempDir, cap: Option<usize>) -> BroadcastEngine {
        let store =
            Arc::new(SnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
        BroadcastEngine::new(Arc::new(RoomRegistry::new(cap)), store)
    }

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    async fn next_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> String {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Message::Text(t))) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attach_sends_empty_init_for_new_room() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);
        let (a, mut rx) = handle();

        assert!(engine.attach("alpha", &a).await);
        assert_eq!(next_text(&mut rx).await, r#"{"type":"init","code":""}"#);
    }

    #[tokio::test]
    async fn test_attach_sends_stored_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);
        engine.store().create_room("cool-panda-42").unwrap();
        engine.store().save_code("cool-panda-42", "print(1)").unwrap();

        let (a, mut rx) = handle();
        assert!(engine.attach("cool-panda-42", &a).await);
        assert_eq!(
            next_text(&mut rx).await,
            r#"{"type":"init","code":"print(1)"}"#
        );
    }

    #[tokio::test]
    async fn test_update_relayed_to_peers_not_sender() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);

        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        let (c, mut rx_c) = handle();
        engine.attach("alpha", &a).await;
        engine.attach("alpha", &b).await;
        engine.attach("alpha", &c).await;
        next_text(&mut rx_a).await;
        next_text(&mut rx_b).await;
        next_text(&mut rx_c).await;

        let frame = r#"{"type":"code_update","code":"x = 1"}"#;
        engine.handle_message("alpha", &a, frame).await;

        assert_eq!(next_text(&mut rx_b).await, frame);
        assert_eq!(next_text(&mut rx_c).await, frame);
        assert!(
            timeout(Duration::from_millis(100), rx_a.recv()).await.is_err(),
            "sender must not receive its own update"
        );
    }

    #[tokio::test]
    async fn test_update_is_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);

        let (a, mut rx_a) = handle();
        engine.attach("alpha", &a).await;
        next_text(&mut rx_a).await;

        engine
            .handle_message("alpha", &a, r#"{"type":"code_update","code":"x = 1"}"#)
            .await;

        // The write is fire-and-forget; poll until it settles.
        for _ in 0..50 {
            if engine.store().load_code("alpha").unwrap() == Some("x = 1".to_string()) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("snapshot write never settled");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);

        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        engine.attach("alpha", &a).await;
        engine.attach("alpha", &b).await;
        next_text(&mut rx_a).await;
        next_text(&mut rx_b).await;

        engine.handle_message("alpha", &a, r#"{"type":"ping"}"#).await;
        engine.handle_message("alpha", &a, "not json{{{").await;
        assert!(timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());

        // The connection keeps working afterwards.
        let frame = r#"{"type":"code_update","code":"ok"}"#;
        engine.handle_message("alpha", &a, frame).await;
        assert_eq!(next_text(&mut rx_b).await, frame);
    }

    #[tokio::test]
    async fn test_one_dead_peer_does_not_block_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);

        let (a, mut rx_a) = handle();
        let (b, rx_b) = handle();
        let (c, mut rx_c) = handle();
        engine.attach("alpha", &a).await;
        engine.attach("alpha", &b).await;
        engine.attach("alpha", &c).await;
        next_text(&mut rx_a).await;
        next_text(&mut rx_c).await;

        // B's writer is gone but it never unregistered.
        drop(rx_b);

        let frame = r#"{"type":"code_update","code":"x = 1"}"#;
        engine.handle_message("alpha", &a, frame).await;
        assert_eq!(next_text(&mut rx_c).await, frame);
    }

    #[tokio::test]
    async fn test_detach_removes_from_fan_out_and_gc() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, None);

        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        engine.attach("alpha", &a).await;
        engine.attach("alpha", &b).await;
        next_text(&mut rx_a).await;
        next_text(&mut rx_b).await;

        engine.detach("alpha", &b).await;
        engine.detach("alpha", &b).await; // idempotent

        engine
            .handle_message("alpha", &a, r#"{"type":"code_update","code":"x"}"#)
            .await;
        assert!(timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());
        assert_eq!(engine.registry().member_count("alpha").await, 1);

        engine.detach("alpha", &a).await;
        assert_eq!(engine.registry().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_attach_refused_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir, Some(1));

        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        assert!(engine.attach("alpha", &a).await);
        next_text(&mut rx_a).await;

        assert!(!engine.attach("alpha", &b).await);
        // The refused connection never got registered or an init frame.
        assert!(timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());
        assert_eq!(engine.registry().member_count("alpha").await, 1);
    }
}
