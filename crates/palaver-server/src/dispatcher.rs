//! Message dispatcher: classifies one inbound envelope, validates it,
//! orchestrates persistence, and fans out the resulting pushes.
//!
//! Delivery rules:
//! - Heartbeats are answered immediately, no persistence, no fan-out.
//! - A send is persisted exactly once; a failed insert is never retried
//!   and yields a single `failed` status envelope to the sender with a
//!   synthetic `temp_<ms>` id, recipient untouched.
//! - Direct sends report `delivered` to the sender only if the one
//!   recipient push succeeded, `sent` otherwise (stored but nobody live).
//! - Group sends report `delivered` unconditionally once the insert
//!   succeeded: with fan-out to many members a single flag would be
//!   meaningless, and the message is durably stored either way.
//! - Validation failures (missing recipient, media message without a
//!   media reference, non-member group send) are logged and dropped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use palaver_shared::constants::TEMP_ID_PREFIX;
use palaver_shared::{ChatPayload, DeliveryStatus, Envelope, Event, HeartbeatPayload};
use palaver_store::{MessageStore, NewMessage, UserDirectory};

use crate::registry::SessionRegistry;

pub struct MessageDispatcher {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            registry,
            store,
            directory,
        }
    }

    /// Entry point for every well-formed inbound envelope.
    pub async fn dispatch(&self, envelope: Envelope, sender_id: &str) {
        match envelope.event {
            Event::Heartbeat(_) => self.handle_heartbeat(sender_id).await,
            Event::MessageReceive(payload) => {
                if payload.group_id.is_some() {
                    self.handle_group_chat(*payload, sender_id).await;
                } else {
                    self.handle_direct_chat(*payload, sender_id).await;
                }
            }
            other => {
                // Not an error for the connection; clients newer than the
                // server may emit types we do not consume.
                warn!(sender_id, envelope_type = other.name(), "dropping unhandled envelope");
            }
        }
    }

    /// Pure echo: answer with a server timestamp in the same turn.
    async fn handle_heartbeat(&self, sender_id: &str) {
        let reply = Envelope::new(Event::Heartbeat(HeartbeatPayload {
            ping: None,
            pong: Some(Utc::now().timestamp_millis()),
        }));
        self.registry.push(sender_id, &reply).await;
        debug!(user_id = sender_id, "heartbeat answered");
    }

    async fn handle_direct_chat(&self, mut payload: ChatPayload, sender_id: &str) {
        let Some(receiver_id) = payload
            .receiver_id
            .clone()
            .filter(|id| !id.is_empty())
        else {
            warn!(sender_id, "direct send dropped, no receiver id");
            return;
        };
        if payload.kind.requires_media() && payload.media_url.is_none() {
            warn!(
                sender_id,
                kind = payload.kind.as_str(),
                "send dropped, media message without media url"
            );
            return;
        }

        let stored = match self
            .store
            .insert_message(NewMessage {
                sender_id: sender_id.to_string(),
                receiver_id: Some(receiver_id.clone()),
                group_id: None,
                content: payload.content.clone(),
                kind: payload.kind,
                media_url: payload.media_url.clone(),
                media_mime: payload.media_mime.clone(),
                media_size: payload.media_size,
            })
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(sender_id, %receiver_id, error = %e, "message persist failed");
                self.push_failed(payload, sender_id).await;
                return;
            }
        };

        let created_ms = stored.created_at.timestamp_millis();
        payload.id = Some(stored.id);
        payload.sender_id = Some(sender_id.to_string());
        payload.create_time = Some(created_ms);
        payload.update_time = Some(created_ms);

        // The recipient's copy is being handed to a live connection, so it
        // carries `delivered`; whether that handoff worked decides the
        // sender's status below.
        let mut recipient_copy = payload.clone();
        recipient_copy.status = Some(DeliveryStatus::Delivered);
        let delivered = self
            .registry
            .push(
                &receiver_id,
                &Envelope::new(Event::MessageReceive(Box::new(recipient_copy))),
            )
            .await;

        payload.status = Some(if delivered {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        });
        self.registry
            .push(
                sender_id,
                &Envelope::new(Event::MessageReceive(Box::new(payload))),
            )
            .await;

        info!(sender_id, %receiver_id, delivered, "direct message dispatched");
    }

    async fn handle_group_chat(&self, mut payload: ChatPayload, sender_id: &str) {
        let Some(group_id) = payload.group_id.clone().filter(|id| !id.is_empty()) else {
            warn!(sender_id, "group send dropped, no group id");
            return;
        };
        if payload.kind.requires_media() && payload.media_url.is_none() {
            warn!(
                sender_id,
                kind = payload.kind.as_str(),
                "send dropped, media message without media url"
            );
            return;
        }

        match self.store.is_group_member(&group_id, sender_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(sender_id, %group_id, "group send dropped, sender is not a member");
                return;
            }
            Err(e) => {
                error!(sender_id, %group_id, error = %e, "membership check failed, send dropped");
                return;
            }
        }

        // Enrich group pushes with the sender's display metadata; a lookup
        // failure degrades to an anonymous payload.
        match self.directory.display_info(sender_id).await {
            Ok(Some(profile)) => {
                payload.sender_nickname = Some(profile.display_name().to_string());
                payload.sender_avatar_url = profile.avatar_url;
            }
            Ok(None) => {}
            Err(e) => warn!(sender_id, error = %e, "sender profile lookup failed"),
        }
        payload.receiver_id = None;

        let stored = match self
            .store
            .insert_message(NewMessage {
                sender_id: sender_id.to_string(),
                receiver_id: None,
                group_id: Some(group_id.clone()),
                content: payload.content.clone(),
                kind: payload.kind,
                media_url: payload.media_url.clone(),
                media_mime: payload.media_mime.clone(),
                media_size: payload.media_size,
            })
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(sender_id, %group_id, error = %e, "group message persist failed");
                self.push_failed(payload, sender_id).await;
                return;
            }
        };

        let created_ms = stored.created_at.timestamp_millis();
        payload.id = Some(stored.id);
        payload.sender_id = Some(sender_id.to_string());
        payload.create_time = Some(created_ms);
        payload.update_time = Some(created_ms);

        let mut member_copy = payload.clone();
        member_copy.status = Some(DeliveryStatus::Sent);
        let member_envelope = Envelope::new(Event::MessageReceive(Box::new(member_copy)));

        match self.store.list_group_member_ids(&group_id).await {
            Ok(member_ids) => {
                for member_id in member_ids {
                    if member_id == sender_id {
                        continue;
                    }
                    self.registry.push(&member_id, &member_envelope).await;
                }
            }
            // The message is stored; losing the member list only loses the
            // real-time fan-out.
            Err(e) => error!(%group_id, error = %e, "member list failed, fan-out skipped"),
        }

        payload.status = Some(DeliveryStatus::Delivered);
        self.registry
            .push(
                sender_id,
                &Envelope::new(Event::MessageReceive(Box::new(payload))),
            )
            .await;

        info!(sender_id, %group_id, "group message dispatched");
    }

    /// Report a failed persist to the sender only, echoing the correlation
    /// token and tagging a synthetic temporary id.
    async fn push_failed(&self, mut payload: ChatPayload, sender_id: &str) {
        let now = Utc::now().timestamp_millis();
        payload.id = Some(format!("{TEMP_ID_PREFIX}{now}"));
        payload.sender_id = Some(sender_id.to_string());
        payload.status = Some(DeliveryStatus::Failed);
        payload.create_time = Some(now);
        payload.update_time = Some(now);
        self.registry
            .push(
                sender_id,
                &Envelope::new(Event::MessageReceive(Box::new(payload))),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, ConnectionId};
    use async_trait::async_trait;
    use palaver_shared::{MessageKind, PresenceInfo, PresenceStatus};
    use palaver_store::{StoreError, StoredMessage, UserProfile};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct FakeStore {
        fail_inserts: bool,
        fail_member_list: bool,
        members: HashMap<String, Vec<String>>,
        inserts: Mutex<Vec<NewMessage>>,
        next_id: AtomicU64,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                fail_inserts: false,
                fail_member_list: false,
                members: HashMap::new(),
                inserts: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(42),
            }
        }

        fn insert_count(&self) -> usize {
            self.inserts.lock().unwrap().len()
        }
    }

    fn db_error() -> StoreError {
        StoreError::Unavailable("injected failure".into())
    }

    #[async_trait]
    impl MessageStore for FakeStore {
        async fn insert_message(&self, message: NewMessage) -> palaver_store::error::Result<StoredMessage> {
            if self.fail_inserts {
                return Err(db_error());
            }
            self.inserts.lock().unwrap().push(message);
            Ok(StoredMessage {
                id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
                created_at: Utc::now(),
            })
        }

        async fn is_group_member(
            &self,
            group_id: &str,
            user_id: &str,
        ) -> palaver_store::error::Result<bool> {
            Ok(self
                .members
                .get(group_id)
                .is_some_and(|members| members.iter().any(|m| m == user_id)))
        }

        async fn list_group_member_ids(
            &self,
            group_id: &str,
        ) -> palaver_store::error::Result<Vec<String>> {
            if self.fail_member_list {
                return Err(db_error());
            }
            Ok(self.members.get(group_id).cloned().unwrap_or_default())
        }
    }

    struct FakeDirectory;

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn display_info(
            &self,
            user_id: &str,
        ) -> palaver_store::error::Result<Option<UserProfile>> {
            Ok(Some(UserProfile {
                id: user_id.to_string(),
                username: user_id.to_string(),
                nickname: Some(format!("nick-{user_id}")),
                avatar_url: None,
            }))
        }
    }

    struct Harness {
        registry: Arc<SessionRegistry>,
        store: Arc<FakeStore>,
        dispatcher: MessageDispatcher,
    }

    fn harness(store: FakeStore) -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(store);
        let dispatcher = MessageDispatcher::new(
            registry.clone(),
            store.clone(),
            Arc::new(FakeDirectory),
        );
        Harness {
            registry,
            store,
            dispatcher,
        }
    }

    async fn connect(harness: &Harness, user_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let presence = PresenceInfo {
            id: user_id.to_string(),
            username: user_id.to_string(),
            nickname: user_id.to_string(),
            avatar_url: None,
            status: PresenceStatus::Online,
            last_online: 0,
        };
        harness
            .registry
            .register(user_id, ConnectionHandle::new(ConnectionId::new(), tx), presence)
            .await;
        rx
    }

    fn send_envelope(payload: ChatPayload) -> Envelope {
        Envelope::new(Event::MessageReceive(Box::new(payload)))
    }

    fn direct_send(receiver: &str, content: &str, client_message_id: Option<&str>) -> Envelope {
        send_envelope(ChatPayload {
            receiver_id: Some(receiver.to_string()),
            content: content.to_string(),
            client_message_id: client_message_id.map(str::to_string),
            ..Default::default()
        })
    }

    fn recv_chat(rx: &mut mpsc::UnboundedReceiver<String>) -> ChatPayload {
        let frame = rx.try_recv().expect("expected a pushed envelope");
        let envelope: Envelope = serde_json::from_str(&frame).unwrap();
        match envelope.event {
            Event::MessageReceive(payload) => *payload,
            other => panic!("expected message_receive, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_direct_send_offline_recipient_reports_sent() {
        let h = harness(FakeStore::new());
        let mut sender_rx = connect(&h, "u1").await;

        h.dispatcher
            .dispatch(direct_send("u2", "hi", Some("c1")), "u1")
            .await;

        let status = recv_chat(&mut sender_rx);
        assert_eq!(status.status, Some(DeliveryStatus::Sent));
        assert_eq!(status.id.as_deref(), Some("42"));
        assert_eq!(status.sender_id.as_deref(), Some("u1"));
        assert_eq!(status.receiver_id.as_deref(), Some("u2"));
        assert_eq!(status.client_message_id.as_deref(), Some("c1"));
        assert_eq!(status.create_time, status.update_time);
        assert!(status.create_time.is_some());
        assert_eq!(h.store.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_direct_send_online_recipient_reports_delivered() {
        let h = harness(FakeStore::new());
        let mut sender_rx = connect(&h, "u1").await;
        let mut receiver_rx = connect(&h, "u2").await;

        h.dispatcher
            .dispatch(direct_send("u2", "hi", Some("c1")), "u1")
            .await;

        let copy = recv_chat(&mut receiver_rx);
        assert_eq!(copy.status, Some(DeliveryStatus::Delivered));
        assert_eq!(copy.content, "hi");
        assert_eq!(copy.client_message_id.as_deref(), Some("c1"));

        let status = recv_chat(&mut sender_rx);
        assert_eq!(status.status, Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn test_direct_persist_failure_reports_failed_and_skips_recipient() {
        let mut store = FakeStore::new();
        store.fail_inserts = true;
        let h = harness(store);
        let mut sender_rx = connect(&h, "u1").await;
        let mut receiver_rx = connect(&h, "u2").await;

        h.dispatcher
            .dispatch(direct_send("u2", "hi", Some("c1")), "u1")
            .await;

        let status = recv_chat(&mut sender_rx);
        assert_eq!(status.status, Some(DeliveryStatus::Failed));
        assert!(status.id.unwrap().starts_with(TEMP_ID_PREFIX));
        assert_eq!(status.client_message_id.as_deref(), Some("c1"));

        assert!(receiver_rx.try_recv().is_err());
        assert_eq!(h.store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_send_without_receiver_is_dropped() {
        let h = harness(FakeStore::new());
        let mut sender_rx = connect(&h, "u1").await;

        h.dispatcher
            .dispatch(
                send_envelope(ChatPayload {
                    content: "hi".into(),
                    ..Default::default()
                }),
                "u1",
            )
            .await;

        assert!(sender_rx.try_recv().is_err());
        assert_eq!(h.store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_media_send_without_url_is_dropped() {
        let h = harness(FakeStore::new());
        let mut sender_rx = connect(&h, "u1").await;

        h.dispatcher
            .dispatch(
                send_envelope(ChatPayload {
                    receiver_id: Some("u2".into()),
                    kind: MessageKind::Image,
                    ..Default::default()
                }),
                "u1",
            )
            .await;

        assert!(sender_rx.try_recv().is_err());
        assert_eq!(h.store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_group_fan_out_excludes_sender() {
        let mut store = FakeStore::new();
        store
            .members
            .insert("g1".into(), vec!["a".into(), "b".into(), "c".into()]);
        let h = harness(store);
        let mut a_rx = connect(&h, "a").await;
        let mut b_rx = connect(&h, "b").await;
        let mut c_rx = connect(&h, "c").await;

        h.dispatcher
            .dispatch(
                send_envelope(ChatPayload {
                    group_id: Some("g1".into()),
                    content: "hello group".into(),
                    client_message_id: Some("c9".into()),
                    ..Default::default()
                }),
                "a",
            )
            .await;

        for rx in [&mut b_rx, &mut c_rx] {
            let copy = recv_chat(rx);
            assert_eq!(copy.status, Some(DeliveryStatus::Sent));
            assert_eq!(copy.group_id.as_deref(), Some("g1"));
            assert_eq!(copy.sender_nickname.as_deref(), Some("nick-a"));
            assert!(copy.receiver_id.is_none());
            // Exactly one push per member.
            assert!(rx.try_recv().is_err());
        }

        let status = recv_chat(&mut a_rx);
        assert_eq!(status.status, Some(DeliveryStatus::Delivered));
        assert_eq!(status.client_message_id.as_deref(), Some("c9"));
        assert!(a_rx.try_recv().is_err());

        let inserts = h.store.inserts.lock().unwrap();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].group_id.as_deref(), Some("g1"));
        assert!(inserts[0].receiver_id.is_none());
    }

    #[tokio::test]
    async fn test_group_send_from_non_member_is_fully_dropped() {
        let mut store = FakeStore::new();
        store.members.insert("g1".into(), vec!["b".into()]);
        let h = harness(store);
        let mut a_rx = connect(&h, "a").await;
        let mut b_rx = connect(&h, "b").await;

        h.dispatcher
            .dispatch(
                send_envelope(ChatPayload {
                    group_id: Some("g1".into()),
                    content: "intruder".into(),
                    ..Default::default()
                }),
                "a",
            )
            .await;

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        assert_eq!(h.store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_group_member_list_failure_still_reports_delivered() {
        let mut store = FakeStore::new();
        store.members.insert("g1".into(), vec!["a".into(), "b".into()]);
        store.fail_member_list = true;
        let h = harness(store);
        let mut a_rx = connect(&h, "a").await;
        let mut b_rx = connect(&h, "b").await;

        h.dispatcher
            .dispatch(
                send_envelope(ChatPayload {
                    group_id: Some("g1".into()),
                    content: "hi".into(),
                    ..Default::default()
                }),
                "a",
            )
            .await;

        // Fan-out lost, but the message is stored and the sender told so.
        assert!(b_rx.try_recv().is_err());
        let status = recv_chat(&mut a_rx);
        assert_eq!(status.status, Some(DeliveryStatus::Delivered));
        assert_eq!(h.store.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeats_echo_non_decreasing_pongs() {
        let h = harness(FakeStore::new());
        let mut rx = connect(&h, "u1").await;

        let heartbeat = || {
            Envelope::new(Event::Heartbeat(HeartbeatPayload {
                ping: Some(1),
                pong: None,
            }))
        };
        h.dispatcher.dispatch(heartbeat(), "u1").await;
        h.dispatcher.dispatch(heartbeat(), "u1").await;

        let mut pongs = Vec::new();
        for _ in 0..2 {
            let frame = rx.try_recv().unwrap();
            let envelope: Envelope = serde_json::from_str(&frame).unwrap();
            let Event::Heartbeat(hb) = envelope.event else {
                panic!("expected heartbeat reply");
            };
            pongs.push(hb.pong.expect("pong must be set"));
        }
        assert!(pongs[1] >= pongs[0]);
        assert_eq!(h.store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_unhandled_envelope_is_dropped() {
        let h = harness(FakeStore::new());
        let mut rx = connect(&h, "u1").await;

        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"typing","data":{},"timestamp":1}"#).unwrap();
        h.dispatcher.dispatch(envelope, "u1").await;

        assert!(rx.try_recv().is_err());
        assert_eq!(h.store.insert_count(), 0);
    }
}
