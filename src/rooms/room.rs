use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    db::{self, ChannelId, MessageId, MessageRow, TeamId, UserId},
    AppError, AppResult,
};

const RECENT_MESSAGES: i64 = 50;

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.channel_id, m.sender_id, u.username, u.avatar AS user_avatar, \
     m.content, m.timestamp, m.edited, m.edited_at, m.parent_id";

#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub id: ChannelId,
    pub name: String,
    pub team: Option<TeamId>,
    pub channel_type: String,
    pub created_by: UserId,
    pub members: Vec<UserId>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub channel: ChannelId,
    pub sender: UserId,
    pub username: String,
    pub user_avatar: Option<String>,
    pub content: String,
    pub timestamp: String,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub parent: Option<MessageId>,
}

impl From<MessageRow> for MessageView {
    fn from(row: MessageRow) -> Self {
        MessageView {
            id: row.id,
            channel: row.channel_id,
            sender: row.sender_id,
            username: row.username,
            user_avatar: row.user_avatar,
            content: row.content,
            timestamp: db::rfc3339(row.timestamp),
            edited: row.edited,
            edited_at: row.edited_at.map(db::rfc3339),
            parent: row.parent_id,
        }
    }
}

pub(crate) async fn load_channel(db_pool: &SqlitePool, channel_id: ChannelId) -> Result<ChannelView, sqlx::Error> {
    let (id, name, team, channel_type, created_by): (ChannelId, String, Option<TeamId>, String, UserId) =
        sqlx::query_as("SELECT id,name,team_id,channel_type,created_by FROM channels WHERE id=?")
            .bind(channel_id)
            .fetch_one(db_pool)
            .await?;

    let members = sqlx::query_as::<_, (UserId,)>("SELECT user_id FROM channel_members WHERE channel_id=? ORDER BY user_id")
        .bind(channel_id)
        .fetch_all(db_pool)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

    Ok(ChannelView { id, name, team, channel_type, created_by, members })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_channels(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<ChannelView>>> {
    let ids = sqlx::query_as::<_, (ChannelId,)>(
        "SELECT c.id FROM channels c JOIN channel_members m ON m.channel_id=c.id \
         WHERE m.user_id=? AND c.is_active=1 ORDER BY c.name",
    )
    .bind(user.id)
    .fetch_all(&db_pool)
    .await?;

    let mut channels = Vec::with_capacity(ids.len());
    for (id,) in ids {
        channels.push(load_channel(&db_pool, id).await?);
    }
    Ok(Json(channels))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn recent_messages(
    Path(channel_id): Path<ChannelId>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<MessageView>>> {
    if !db::is_channel_member(&db_pool, channel_id, user.id).await? {
        return Err(AppError::forbidden("Channel not found or access denied"));
    }

    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id=m.sender_id \
         WHERE m.channel_id=? ORDER BY m.timestamp DESC, m.id DESC LIMIT ?"
    ))
    .bind(channel_id)
    .bind(RECENT_MESSAGES)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(rows.into_iter().map(MessageView::from).collect()))
}
