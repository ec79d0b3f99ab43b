use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    db::{ChannelKind, TeamId, UserId},
    AppError, AppResult,
};

use super::room::{load_channel, ChannelView};

#[derive(Debug, Deserialize)]
pub(crate) struct NewChannelRequest {
    name: String,
    team: Option<TeamId>,
    channel_type: ChannelKind,
    #[serde(default)]
    members: Vec<UserId>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_channel(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,

    Json(NewChannelRequest { name, team, channel_type, members }): Json<NewChannelRequest>,
) -> AppResult<(StatusCode, Json<ChannelView>)> {
    let name = name.trim().to_owned();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::bad_request("Channel name must be 1-100 characters."));
    }
    if channel_type == ChannelKind::Direct && (members.len() != 1 || members.contains(&user.id)) {
        return Err(AppError::bad_request("Direct messages require exactly 1 other member"));
    }

    let mut tx = db_pool.begin().await?;

    if let Some(team) = team {
        let exists = sqlx::query("SELECT 1 FROM teams WHERE id=?")
            .bind(team)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::bad_request(format!("Invalid team id {team}")));
        }

        let taken = sqlx::query("SELECT 1 FROM channels WHERE name=? AND team_id=?")
            .bind(&name)
            .bind(team)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if taken {
            return Err(AppError::bad_request("A channel with this name already exists in the team."));
        }
    }

    for member in &members {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id=?")
            .bind(member)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::bad_request(format!("Invalid user id {member}")));
        }
    }

    let channel_id = sqlx::query("INSERT INTO channels (name,team_id,channel_type,created_by) VALUES (?,?,?,?)")
        .bind(&name)
        .bind(team)
        .bind(channel_type.as_str())
        .bind(user.id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    let add = "INSERT OR IGNORE INTO channel_members (channel_id,user_id) VALUES (?,?)";
    sqlx::query(add).bind(channel_id).bind(user.id).execute(&mut *tx).await?;

    if let Some(team) = team.filter(|_| channel_type != ChannelKind::Direct) {
        sqlx::query(
            "INSERT OR IGNORE INTO channel_members (channel_id,user_id) \
             SELECT ?, user_id FROM team_members WHERE team_id=?",
        )
        .bind(channel_id)
        .bind(team)
        .execute(&mut *tx)
        .await?;
    }

    for member in members {
        sqlx::query(add).bind(channel_id).bind(member).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    tracing::info!(channel_id, user_id = user.id, kind = channel_type.as_str(), "channel created");

    Ok((StatusCode::CREATED, Json(load_channel(&db_pool, channel_id).await?)))
}
