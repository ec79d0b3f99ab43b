use axum::{debug_handler, extract::State, Json};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{auth::AuthUser, db::{self, UserId, UserRow}, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub online: bool,
    pub last_seen: String,
    pub avatar: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<ProfileView>> {
    let row: UserRow = sqlx::query_as("SELECT id,username,email,avatar,online,last_seen FROM users WHERE id=?")
        .bind(user.id)
        .fetch_one(&db_pool)
        .await?;

    Ok(Json(ProfileView {
        id: row.id,
        username: row.username,
        email: row.email,
        online: row.online,
        last_seen: db::rfc3339(row.last_seen),
        avatar: row.avatar,
    }))
}
