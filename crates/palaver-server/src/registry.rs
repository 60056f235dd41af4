//! Session registry: the single shared mutable resource of the core.
//!
//! Maps each user id to its one live connection plus a cached presence
//! snapshot. Registration replaces (last-connection-wins) and removal is
//! identity-checked, so a stale close event racing a reconnect can never
//! evict the newer connection.
//!
//! Locking discipline: `register`/`deregister` take the write lock,
//! `push`/`broadcast` and the read-only queries take the read lock. An
//! actual socket write is just an enqueue onto the connection's outbound
//! channel (the writer task owns the sink), so nothing awaits while a lock
//! is held and pushes to different users never serialize on each other.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use palaver_shared::{Envelope, PresenceInfo};

/// Identity of one accepted WebSocket connection.
///
/// Distinct from the user id: the same user may reconnect and get a new
/// `ConnectionId`, which is what makes the stale-close check possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Write half of a live connection.
///
/// Frames are serialized JSON handed to the connection's writer task over
/// an unbounded channel; a send only fails once the writer is gone, which
/// is exactly the "connection no longer writable" signal push wants.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }
}

struct Session {
    conn: ConnectionHandle,
    presence: PresenceInfo,
    connected_at: DateTime<Utc>,
}

/// Registry of all live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the session for `user_id` (last-connection-wins).
    ///
    /// Returns whether the user already had a live session immediately
    /// before this call; the gateway uses it to suppress duplicate online
    /// broadcasts.
    pub async fn register(
        &self,
        user_id: &str,
        conn: ConnectionHandle,
        presence: PresenceInfo,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let was_online = sessions
            .insert(
                user_id.to_string(),
                Session {
                    conn,
                    presence,
                    connected_at: Utc::now(),
                },
            )
            .is_some();
        info!(user_id, total = sessions.len(), "user connected");
        was_online
    }

    /// Remove the session only if it still belongs to `conn_id`.
    ///
    /// A close event from a connection that has already been replaced is a
    /// no-op; the return value tells the gateway whether to broadcast
    /// offline.
    pub async fn deregister(&self, user_id: &str, conn_id: ConnectionId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(user_id) {
            Some(session) if session.conn.id() == conn_id => {
                let connected_secs = (Utc::now() - session.connected_at).num_seconds();
                sessions.remove(user_id);
                info!(
                    user_id,
                    connected_secs,
                    total = sessions.len(),
                    "user disconnected"
                );
                true
            }
            _ => false,
        }
    }

    /// Current connection handle for `user_id`, if any.
    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|session| session.conn.clone())
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// Cached presence snapshot for one user.
    pub async fn presence_of(&self, user_id: &str) -> Option<PresenceInfo> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|session| session.presence.clone())
    }

    pub async fn online_user_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn presence_snapshots(&self) -> Vec<PresenceInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(|session| session.presence.clone())
            .collect()
    }

    /// Serialize `envelope` and hand it to `user_id`'s connection.
    ///
    /// Fire-and-forget: returns `false` for "no session" and for any write
    /// failure, never an error. "Recipient offline" is an ordinary outcome
    /// for callers, not an error path.
    pub async fn push(&self, user_id: &str, envelope: &Envelope) -> bool {
        let Some(conn) = self.lookup(user_id).await else {
            return false;
        };
        let Some(frame) = encode(envelope) else {
            return false;
        };
        let sent = conn.send(frame);
        if !sent {
            debug!(user_id, "push dropped, connection writer gone");
        }
        sent
    }

    /// Push to every live session except `exclude_user_id`.
    ///
    /// Per-recipient failures are isolated; one closed connection never
    /// affects delivery to the others.
    pub async fn broadcast(&self, envelope: &Envelope, exclude_user_id: Option<&str>) {
        let Some(frame) = encode(envelope) else {
            return;
        };
        let sessions = self.sessions.read().await;
        for (user_id, session) in sessions.iter() {
            if exclude_user_id == Some(user_id.as_str()) {
                continue;
            }
            if !session.conn.send(frame.clone()) {
                debug!(%user_id, "broadcast skipped, connection writer gone");
            }
        }
    }
}

fn encode(envelope: &Envelope) -> Option<String> {
    match serde_json::to_string(envelope) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "failed to serialize envelope");
            None
        }
    }
}
