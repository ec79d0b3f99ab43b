#![allow(dead_code)]

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use teamchat::{config::Config, db, AppState};

pub async fn state() -> AppState {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&db_pool).await.unwrap();
    AppState::new(db_pool, Config::for_tests())
}

/// Inserts a user and returns `(id, bearer token)`.
pub async fn user(state: &AppState, username: &str) -> (i64, String) {
    let id = sqlx::query("INSERT INTO users (username,email) VALUES (?,?)")
        .bind(username)
        .bind(format!("{username}@example.com"))
        .execute(&state.db_pool)
        .await
        .unwrap()
        .last_insert_rowid();
    (id, state.keys.issue(id, username).unwrap())
}

pub async fn channel(db_pool: &SqlitePool, name: &str, members: &[i64]) -> i64 {
    let id = sqlx::query("INSERT INTO channels (name,channel_type,created_by) VALUES (?,'public',?)")
        .bind(name)
        .bind(members[0])
        .execute(db_pool)
        .await
        .unwrap()
        .last_insert_rowid();
    for member in members {
        sqlx::query("INSERT INTO channel_members (channel_id,user_id) VALUES (?,?)")
            .bind(id)
            .bind(member)
            .execute(db_pool)
            .await
            .unwrap();
    }
    id
}

pub async fn message(db_pool: &SqlitePool, channel: i64, sender: i64, content: &str, timestamp: i64) -> i64 {
    sqlx::query("INSERT INTO messages (channel_id,sender_id,content,timestamp) VALUES (?,?,?,?)")
        .bind(channel)
        .bind(sender)
        .bind(content)
        .bind(timestamp)
        .execute(db_pool)
        .await
        .unwrap()
        .last_insert_rowid()
}
