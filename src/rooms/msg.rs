use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{auth::Identity, db::{self, ChannelId, MessageId, UserId}};

/// A message as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: i64,
    pub parent_id: Option<MessageId>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("You are not a member of this channel")]
    PermissionDenied,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Where the gateway hands accepted messages off to.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `content`, checking channel membership at write time.
    async fn save_message(
        &self,
        channel_id: ChannelId,
        sender: &Identity,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Moves the sender's read marker for `channel_id` to now.
    async fn touch_last_seen(&self, sender: &Identity, channel_id: ChannelId) -> Result<(), StoreError>;
}

pub struct SqliteMessageStore {
    db_pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        SqliteMessageStore { db_pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save_message(
        &self,
        channel_id: ChannelId,
        sender: &Identity,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut tx = self.db_pool.begin().await?;

        // an unknown or archived channel reads the same as not being a member
        let member = sqlx::query(
            "SELECT 1 FROM channel_members m JOIN channels c ON c.id=m.channel_id \
             WHERE m.channel_id=? AND m.user_id=? AND c.is_active=1",
        )
        .bind(channel_id)
        .bind(sender.id)
        .fetch_optional(&mut *tx)
        .await?;
        if member.is_none() {
            return Err(StoreError::PermissionDenied);
        }

        let timestamp = db::now();
        let id = sqlx::query("INSERT INTO messages (channel_id,sender_id,content,timestamp) VALUES (?,?,?,?)")
            .bind(channel_id)
            .bind(sender.id)
            .bind(content)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        tx.commit().await?;

        Ok(Message {
            id,
            channel_id,
            sender_id: sender.id,
            content: content.to_owned(),
            timestamp,
            parent_id: None,
        })
    }

    async fn touch_last_seen(&self, sender: &Identity, channel_id: ChannelId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_channel_last_seen (user_id,channel_id,last_seen) VALUES (?,?,?) \
             ON CONFLICT (user_id,channel_id) DO UPDATE SET last_seen=excluded.last_seen",
        )
        .bind(sender.id)
        .bind(channel_id)
        .bind(db::now())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}
