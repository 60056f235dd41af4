//! Collaborator contracts consumed by the messaging core.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewMessage, StoredMessage, UserProfile};

/// Message persistence and group membership, as seen by the dispatcher.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message. Write-once: callers never retry.
    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Whether `user_id` belongs to `group_id`.
    async fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool>;

    /// Full membership of `group_id`, sender included.
    async fn list_group_member_ids(&self, group_id: &str) -> Result<Vec<String>>;
}

/// User display lookups, as seen by the handshake and group enrichment.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` means the user does not exist.
    async fn display_info(&self, user_id: &str) -> Result<Option<UserProfile>>;
}
