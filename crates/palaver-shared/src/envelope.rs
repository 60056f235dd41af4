//! The uniform `{ "type", "data", "timestamp" }` wire unit.
//!
//! `Envelope` is produced by both sides and never persisted as-is. The
//! `type`/`data` pair is modelled as an adjacently tagged enum; envelope
//! types the core does not consume deserialize into [`Event::Unknown`] so
//! that an unrecognized type is dropped instead of being treated as a
//! malformed frame.

use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::types::{DeliveryStatus, MessageKind, PresenceInfo};

/// One WebSocket frame, either direction.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: Event,
    /// Milliseconds since the epoch, set by whoever built the envelope.
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap an event with the current server time.
    pub fn new(event: Event) -> Self {
        Self {
            event,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

// Decoded in two stages: the tag first, then the payload against the shape
// that tag demands. An unrecognized tag falls through to [`Event::Unknown`]
// whatever its `data` carries; a recognized tag with an ill-shaped payload
// is a malformed frame.
impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawEnvelope {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            data: serde_json::Value,
            timestamp: i64,
        }

        fn payload<'de, T, D>(data: serde_json::Value) -> Result<T, D::Error>
        where
            T: serde::de::DeserializeOwned,
            D: Deserializer<'de>,
        {
            serde_json::from_value(data).map_err(de::Error::custom)
        }

        let raw = RawEnvelope::deserialize(deserializer)?;
        let event = match raw.kind.as_str() {
            "heartbeat" => Event::Heartbeat(payload::<_, D>(raw.data)?),
            "message_receive" => Event::MessageReceive(Box::new(payload::<_, D>(raw.data)?)),
            "user_online" => Event::UserOnline(payload::<_, D>(raw.data)?),
            "user_offline" => Event::UserOffline(payload::<_, D>(raw.data)?),
            "error" => Event::Error(payload::<_, D>(raw.data)?),
            "friend_request_created" => Event::FriendRequestCreated(raw.data),
            "friend_request_accepted" => Event::FriendRequestAccepted(raw.data),
            "friend_request_rejected" => Event::FriendRequestRejected(raw.data),
            "friend_removed" => Event::FriendRemoved(raw.data),
            "group_membership_changed" => Event::GroupMembershipChanged(raw.data),
            _ => Event::Unknown,
        };
        Ok(Self {
            event,
            timestamp: raw.timestamp,
        })
    }
}

/// All envelope types the core consumes or produces.
///
/// The friend/group notification variants are produced by the HTTP side of
/// the system; the core only routes them through `push`/`broadcast`, so
/// their payloads stay opaque JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Heartbeat(HeartbeatPayload),
    MessageReceive(Box<ChatPayload>),
    UserOnline(UserOnlinePayload),
    UserOffline(UserOfflinePayload),
    Error(ErrorPayload),
    FriendRequestCreated(serde_json::Value),
    FriendRequestAccepted(serde_json::Value),
    FriendRequestRejected(serde_json::Value),
    FriendRemoved(serde_json::Value),
    GroupMembershipChanged(serde_json::Value),
    /// Any `type` value this build does not recognize. Never serialized.
    Unknown,
}

impl Event {
    /// Wire name of the envelope type, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Heartbeat(_) => "heartbeat",
            Event::MessageReceive(_) => "message_receive",
            Event::UserOnline(_) => "user_online",
            Event::UserOffline(_) => "user_offline",
            Event::Error(_) => "error",
            Event::FriendRequestCreated(_) => "friend_request_created",
            Event::FriendRequestAccepted(_) => "friend_request_accepted",
            Event::FriendRequestRejected(_) => "friend_request_rejected",
            Event::FriendRemoved(_) => "friend_removed",
            Event::GroupMembershipChanged(_) => "group_membership_changed",
            Event::Unknown => "unknown",
        }
    }
}

/// Client-initiated keepalive. The client sends `ping`, the server answers
/// with `pong`; both are millisecond timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong: Option<i64>,
}

/// Payload of a `message_receive` envelope.
///
/// The same shape is used for the client's send request and for every
/// server push derived from it (recipient copies and the sender's status
/// envelope). Server-assigned fields are `None` on the inbound leg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatPayload {
    /// Caller-supplied correlation token, echoed verbatim, never persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    /// Durable id from the store, or `temp_<ms>` on a failed persist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_avatar_url: Option<String>,
    pub receiver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub media_mime: Option<String>,
    pub media_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlinePayload {
    pub user_id: String,
    pub user_info: PresenceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOfflinePayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
