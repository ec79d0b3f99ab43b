use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub type UserId = i64;
pub type TeamId = i64;
pub type ChannelId = i64;
pub type MessageId = i64;

// timestamps are unix seconds throughout
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT    NOT NULL UNIQUE,
    email         TEXT    NOT NULL DEFAULT '',
    password_hash TEXT    NOT NULL DEFAULT '',
    avatar        TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    online        INTEGER NOT NULL DEFAULT 0,
    last_seen     INTEGER NOT NULL DEFAULT (unixepoch())
);
CREATE INDEX IF NOT EXISTS users_online_idx ON users (online);

CREATE TABLE IF NOT EXISTS teams (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL,
    description TEXT    NOT NULL DEFAULT '',
    created_by  INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    created_at  INTEGER NOT NULL DEFAULT (unixepoch())
);
CREATE INDEX IF NOT EXISTS teams_name_idx ON teams (name);

CREATE TABLE IF NOT EXISTS team_members (
    team_id INTEGER NOT NULL REFERENCES teams (id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    PRIMARY KEY (team_id, user_id)
);

CREATE TABLE IF NOT EXISTS channels (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT    NOT NULL,
    team_id      INTEGER REFERENCES teams (id) ON DELETE CASCADE,
    channel_type TEXT    NOT NULL CHECK (channel_type IN ('public', 'private', 'direct')),
    created_by   INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    created_at   INTEGER NOT NULL DEFAULT (unixepoch()),
    is_active    INTEGER NOT NULL DEFAULT 1,
    UNIQUE (name, team_id)
);
CREATE INDEX IF NOT EXISTS channels_team_type_idx ON channels (team_id, channel_type);

CREATE TABLE IF NOT EXISTS channel_members (
    channel_id INTEGER NOT NULL REFERENCES channels (id) ON DELETE CASCADE,
    user_id    INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    PRIMARY KEY (channel_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL REFERENCES channels (id) ON DELETE CASCADE,
    sender_id  INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    content    TEXT    NOT NULL,
    timestamp  INTEGER NOT NULL,
    edited     INTEGER NOT NULL DEFAULT 0,
    edited_at  INTEGER,
    parent_id  INTEGER REFERENCES messages (id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS messages_channel_ts_idx ON messages (channel_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS messages_sender_ts_idx ON messages (sender_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS user_channel_last_seen (
    user_id    INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    channel_id INTEGER NOT NULL REFERENCES channels (id) ON DELETE CASCADE,
    last_seen  INTEGER NOT NULL,
    PRIMARY KEY (user_id, channel_id)
);
"#;

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Public,
    Private,
    Direct,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        use ChannelKind::*;
        match self {
            Public => "public",
            Private => "private",
            Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub online: bool,
    pub last_seen: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub username: String,
    pub user_avatar: Option<String>,
    pub content: String,
    pub timestamp: i64,
    pub edited: bool,
    pub edited_at: Option<i64>,
    pub parent_id: Option<MessageId>,
}

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Renders a stored unix timestamp as RFC 3339; out-of-range values fall back to the epoch.
pub fn rfc3339(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub async fn is_channel_member(
    db_pool: &SqlitePool,
    channel_id: ChannelId,
    user_id: UserId,
) -> Result<bool, sqlx::Error> {
    Ok(
        sqlx::query("SELECT 1 FROM channel_members WHERE channel_id=? AND user_id=?")
            .bind(channel_id)
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?
            .is_some()
    )
}
