//! # palaver-server
//!
//! Real-time messaging backend.
//!
//! This binary provides:
//! - **WebSocket gateway** (axum) with JWT handshake authentication
//! - **Session registry** tracking one live connection per user
//! - **Presence broadcasts** (`user_online` / `user_offline`) to all sessions
//! - **Message dispatch** for direct and group chat, persisted to Postgres
//!   before any fan-out
//! - **REST API** for health checks and online-user queries

mod api;
mod auth;
mod config;
mod dispatcher;
mod gateway;
mod presence;
mod registry;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_store::{MessageStore, PgStore, UserDirectory};

use crate::api::AppState;
use crate::auth::JwtVerifier;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting Palaver server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(http_addr = %config.http_addr, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // One Postgres pool behind both collaborator seams.
    let pg = Arc::new(PgStore::connect(&config.database_url).await?);
    info!("Connected to Postgres");

    let store: Arc<dyn MessageStore> = pg.clone();
    let directory: Arc<dyn UserDirectory> = pg;
    let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));

    let app_state = AppState::new(store, directory, verifier);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
