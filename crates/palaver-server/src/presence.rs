//! Online/offline announcements.
//!
//! Both announcements go to every live session, including other sessions
//! of the same user; nobody acknowledges them. The suppression logic (no
//! duplicate online for a second connection, no offline for a stale
//! close) lives with the register/deregister return values in the
//! gateway, not here.

use std::sync::Arc;

use tracing::debug;

use palaver_shared::{Envelope, Event, UserOfflinePayload, UserOnlinePayload};

use crate::registry::SessionRegistry;

pub struct PresenceBroadcaster {
    registry: Arc<SessionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast `user_online` carrying the cached presence snapshot.
    ///
    /// No-op when the user raced offline between registration and this
    /// call; there is no snapshot left to announce.
    pub async fn announce_online(&self, user_id: &str) {
        let Some(user_info) = self.registry.presence_of(user_id).await else {
            debug!(user_id, "online announcement skipped, no session");
            return;
        };
        let envelope = Envelope::new(Event::UserOnline(UserOnlinePayload {
            user_id: user_id.to_string(),
            user_info,
        }));
        self.registry.broadcast(&envelope, None).await;
        debug!(user_id, "announced online");
    }

    /// Broadcast a minimal `user_offline` carrying only the user id.
    pub async fn announce_offline(&self, user_id: &str) {
        let envelope = Envelope::new(Event::UserOffline(UserOfflinePayload {
            user_id: user_id.to_string(),
        }));
        self.registry.broadcast(&envelope, None).await;
        debug!(user_id, "announced offline");
    }
}
