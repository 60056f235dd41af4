use serde::{Deserialize, Serialize};

/// Kind of a chat message.
///
/// Image and video messages must carry a media reference; the dispatcher
/// rejects them otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
        }
    }

    /// Whether this kind requires a `mediaUrl` on the send payload.
    pub fn requires_media(self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Video)
    }
}

/// Delivery state reported back to a message's sender.
///
/// `Sent` means durably stored but no live recipient connection took the
/// push; it is not a failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
}

/// Online/offline visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Cached snapshot of a user's display metadata, refreshed on every
/// successful handshake and carried in `user_online` broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub id: String,
    pub username: String,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    /// Milliseconds since the epoch.
    pub last_online: i64,
}
