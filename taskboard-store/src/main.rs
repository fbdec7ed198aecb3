//! Taskboard document store server.
//!
//! An axum WebSocket server holding task collections in memory. Clients
//! subscribe to a collection and receive a full ordered snapshot after
//! every committed write.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin taskboard-store
//!
//! # Run on custom address
//! cargo run --bin taskboard-store -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! STORE_ADDR=127.0.0.1:8080 cargo run --bin taskboard-store
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_store::config::{StoreCliArgs, StoreConfig};
use taskboard_store::server::{self, ServerState};
use taskboard_store::store::DocumentStore;

#[tokio::main]
async fn main() {
    let cli = StoreCliArgs::parse();

    let config = match StoreConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_documents = config.max_documents,
        "starting taskboard store server"
    );

    let store = DocumentStore::with_max_documents(config.max_documents);
    let state = Arc::new(ServerState::with_config(config.max_frame_size, store));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "store server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "store server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start store server");
            std::process::exit(1);
        }
    }
}
