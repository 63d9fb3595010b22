//! CodeSync relay server binary.
//!
//! Configuration comes from the environment (`CODESYNC_BIND_ADDR`,
//! `CODESYNC_DATA_DIR`, `CODESYNC_MAX_CLIENTS_PER_ROOM`); log filtering
//! is the usual `RUST_LOG`.

use codesync_collab::server::{CollabServer, ServerConfig};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "starting codesync relay on {} (data dir: {})",
        config.bind_addr,
        config.data_dir.display()
    );

    let server = CollabServer::new(config)?;
    server.run().await
}
