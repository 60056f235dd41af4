//! WebSocket gateway: accepts upgrades, authenticates the handshake, and
//! drives each connection through its session lifecycle.
//!
//! One task per connection owns the read loop; a second task owns the
//! write half and drains the connection's outbound channel. All inbound
//! frames of a connection are processed in order; only that connection
//! awaits its own store round-trips.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use palaver_shared::{Envelope, ErrorPayload, Event, PresenceInfo, PresenceStatus};
use palaver_store::UserDirectory;

use crate::api::AppState;
use crate::auth::{AuthError, TokenVerifier};
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionId, SessionRegistry};

/// Connection lifecycle. Primarily diagnostic: the transitions are driven
/// by the sequential flow of [`handle_socket`], the enum keeps the traces
/// honest about where a connection died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// `GET /ws?token=...` upgrade handler.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket, query.token))
}

async fn handle_socket(state: AppState, mut socket: WebSocket, token: Option<String>) {
    let conn_id = ConnectionId::new();
    let mut phase = Phase::Connecting;
    debug!(%conn_id, ?phase, "connection accepted");

    phase = Phase::Authenticating;
    let (user_id, presence) = match authenticate(
        state.verifier.as_ref(),
        state.directory.as_ref(),
        token.as_deref(),
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            // Fatal and terminal: policy-violation close, no envelope
            // exchange.
            debug!(%conn_id, ?phase, error = %e, "handshake rejected");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (mut sink, mut stream) = socket.split();

    // Writer task: sole owner of the sink, so per-connection writes never
    // contend with reads or with other connections.
    let writer_conn = conn_id;
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                debug!(conn_id = %writer_conn, "write failed, stopping writer");
                break;
            }
        }
    });

    session_opened(
        &state.registry,
        &state.presence,
        &user_id,
        ConnectionHandle::new(conn_id, tx.clone()),
        presence,
    )
    .await;

    phase = Phase::Active;
    info!(%conn_id, user_id, ?phase, "session active");

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                debug!(%conn_id, user_id, error = %e, "read error");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_frame(&state, &tx, &user_id, text.as_bytes()).await,
            Message::Binary(data) => handle_frame(&state, &tx, &user_id, &data).await,
            Message::Close(_) => break,
            // Liveness probes are answered by the protocol layer; a failed
            // probe surfaces as a read error above.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    phase = Phase::Closing;
    debug!(%conn_id, user_id, ?phase, "connection closing");
    writer.abort();
    let _ = (&mut writer).await;

    let removed = session_closed(&state.registry, &state.presence, &user_id, conn_id).await;

    phase = Phase::Closed;
    debug!(%conn_id, user_id, ?phase, removed, "connection closed");
}

/// Install the session and announce the user online, unless the user was
/// already online on another connection (a relogin must not rebroadcast).
async fn session_opened(
    registry: &SessionRegistry,
    presence: &PresenceBroadcaster,
    user_id: &str,
    conn: ConnectionHandle,
    info: PresenceInfo,
) {
    let was_online = registry.register(user_id, conn, info).await;
    if !was_online {
        presence.announce_online(user_id).await;
    }
}

/// Identity-checked removal: a close from a connection that a reconnect
/// already replaced removes nothing and must not broadcast offline.
async fn session_closed(
    registry: &SessionRegistry,
    presence: &PresenceBroadcaster,
    user_id: &str,
    conn_id: ConnectionId,
) -> bool {
    let removed = registry.deregister(user_id, conn_id).await;
    if removed {
        presence.announce_offline(user_id).await;
    }
    removed
}

/// Token → user id → display metadata, all before any envelope exchange.
async fn authenticate(
    verifier: &dyn TokenVerifier,
    directory: &dyn UserDirectory,
    token: Option<&str>,
) -> Result<(String, PresenceInfo), AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let user_id = verifier.verify(token)?;

    let profile = directory
        .display_info(&user_id)
        .await
        .map_err(|e| {
            error!(user_id, error = %e, "user lookup failed during handshake");
            AuthError::UnknownUser
        })?
        .ok_or(AuthError::UnknownUser)?;

    let nickname = profile.display_name().to_string();
    let presence = PresenceInfo {
        id: profile.id,
        username: profile.username,
        nickname,
        avatar_url: profile.avatar_url,
        status: PresenceStatus::Online,
        last_online: Utc::now().timestamp_millis(),
    };
    Ok((user_id, presence))
}

/// Parse one frame and hand it to the dispatcher.
///
/// A malformed frame is answered with an `error` envelope on this
/// connection and otherwise ignored; the session stays active.
async fn handle_frame(
    state: &AppState,
    tx: &mpsc::UnboundedSender<String>,
    user_id: &str,
    raw: &[u8],
) {
    let envelope: Envelope = match serde_json::from_slice(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(user_id, error = %e, "malformed frame");
            let reply = Envelope::new(Event::Error(ErrorPayload {
                message: "Invalid message format".to_string(),
            }));
            if let Ok(frame) = serde_json::to_string(&reply) {
                let _ = tx.send(frame);
            }
            return;
        }
    };
    state.dispatcher.dispatch(envelope, user_id).await;
}
