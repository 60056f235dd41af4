//! Postgres implementation of the store contracts.
//!
//! Schema expectations (mirroring the relational store the rest of the
//! system already uses):
//! - `messages(id BIGSERIAL, sender_id TEXT, receiver_id TEXT NULL,
//!   group_id TEXT NULL, content TEXT, message_type TEXT, media_url TEXT
//!   NULL, media_mime TEXT NULL, media_size BIGINT NULL, is_read BOOL,
//!   created_at TIMESTAMPTZ DEFAULT now())`
//! - `group_members(group_id TEXT, user_id TEXT)`
//! - `users(id TEXT, username TEXT, nickname TEXT NULL, avatar_url TEXT NULL)`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;
use crate::models::{NewMessage, StoredMessage, UserProfile};
use crate::traits::{MessageStore, UserDirectory};

/// Shared Postgres handle implementing both collaborator contracts.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with a small dedicated pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        tracing::info!("connecting to postgres");
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (useful when the HTTP side shares it).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO messages \
                 (sender_id, receiver_id, group_id, content, message_type, \
                  media_url, media_mime, media_size, is_read) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE) \
             RETURNING id, created_at",
        )
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.group_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.media_url)
        .bind(&message.media_mime)
        .bind(message.media_size)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredMessage {
            id: id.to_string(),
            created_at,
        })
    }

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }

    async fn list_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM group_members WHERE group_id = $1")
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn display_info(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row: Option<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, username, nickname, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, username, nickname, avatar_url)| UserProfile {
            id,
            username,
            nickname,
            avatar_url,
        }))
    }
}
