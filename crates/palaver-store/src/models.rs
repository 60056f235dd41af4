use chrono::{DateTime, Utc};
use palaver_shared::MessageKind;

/// A chat message handed to the store for insertion.
///
/// Exactly one of `receiver_id` (direct) or `group_id` (group) is set by
/// the dispatcher. The client's correlation token is deliberately absent:
/// it is echoed on the wire, never persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub media_mime: Option<String>,
    pub media_size: Option<i64>,
}

/// What the store assigns on a successful insert.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Durable id, distinct from any client-generated token.
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Display metadata for one user, resolved during the handshake and for
/// group-send enrichment.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Nickname if set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}
