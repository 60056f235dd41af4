//! HTTP router and shared application state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use palaver_store::{MessageStore, UserDirectory};

use crate::auth::TokenVerifier;
use crate::dispatcher::MessageDispatcher;
use crate::gateway;
use crate::presence::PresenceBroadcaster;
use crate::registry::SessionRegistry;

/// Everything a request handler can reach. Cheap to clone: all fields are
/// shared handles.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceBroadcaster>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            registry.clone(),
            store,
            directory.clone(),
        ));
        Self {
            registry,
            presence,
            dispatcher,
            verifier,
            directory,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/online", get(online_users))
        .route("/api/online/:user_id", get(online_status))
        .route("/ws", get(gateway::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn online_users(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids = state.registry.online_user_ids().await;
    let users = state.registry.presence_snapshots().await;
    Json(json!({
        "count": ids.len(),
        "userIds": ids,
        "users": users,
    }))
}

async fn online_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let online = state.registry.is_online(&user_id).await;
    Json(json!({
        "userId": user_id,
        "online": online,
    }))
}
