//! # palaver-shared
//!
//! Wire protocol shared between the Palaver server and its clients.
//!
//! Every frame on the WebSocket is a JSON [`Envelope`]: a `type` tag, a
//! type-specific `data` object, and a millisecond timestamp. The crate
//! models the envelope as a tagged enum so that the dispatch boundary can
//! match exhaustively instead of poking at untyped JSON.

pub mod constants;
pub mod envelope;
pub mod types;

pub use envelope::{
    ChatPayload, Envelope, ErrorPayload, Event, HeartbeatPayload, UserOfflinePayload,
    UserOnlinePayload,
};
pub use types::{DeliveryStatus, MessageKind, PresenceInfo, PresenceStatus};
