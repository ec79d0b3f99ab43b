use axum::{debug_handler, extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{auth::AuthUser, db::{self, TeamId, UserId}, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_teams).post(new_team))
}

#[derive(Debug, Serialize)]
pub struct TeamView {
    pub id: TeamId,
    pub name: String,
    pub description: String,
    pub created_by: UserId,
    pub created_at: String,
    pub members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewTeamRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    members: Vec<UserId>,
}

async fn load_team(db_pool: &SqlitePool, team_id: TeamId) -> Result<TeamView, sqlx::Error> {
    let (id, name, description, created_by, created_at): (TeamId, String, String, UserId, i64) =
        sqlx::query_as("SELECT id,name,description,created_by,created_at FROM teams WHERE id=?")
            .bind(team_id)
            .fetch_one(db_pool)
            .await?;

    let members = sqlx::query_as::<_, (UserId,)>("SELECT user_id FROM team_members WHERE team_id=? ORDER BY user_id")
        .bind(team_id)
        .fetch_all(db_pool)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

    Ok(TeamView {
        id,
        name,
        description,
        created_by,
        created_at: db::rfc3339(created_at),
        members,
    })
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_teams(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<TeamView>>> {
    let ids = sqlx::query_as::<_, (TeamId,)>(
        "SELECT t.id FROM teams t JOIN team_members m ON m.team_id=t.id WHERE m.user_id=? ORDER BY t.name",
    )
    .bind(user.id)
    .fetch_all(&db_pool)
    .await?;

    let mut teams = Vec::with_capacity(ids.len());
    for (id,) in ids {
        teams.push(load_team(&db_pool, id).await?);
    }
    Ok(Json(teams))
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_team(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,

    Json(NewTeamRequest { name, description, members }): Json<NewTeamRequest>,
) -> AppResult<(StatusCode, Json<TeamView>)> {
    let name = name.trim().to_owned();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::bad_request("Team name must be 1-100 characters."));
    }
    if members.contains(&user.id) {
        return Err(AppError::bad_request("Creator is automatically added as member"));
    }

    let mut tx = db_pool.begin().await?;

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

    let team_id = sqlx::query("INSERT INTO teams (name,description,created_by) VALUES (?,?,?)")
        .bind(&name)
        .bind(&description)
        .bind(user.id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    for member in std::iter::once(user.id).chain(members) {
        sqlx::query("INSERT OR IGNORE INTO team_members (team_id,user_id) VALUES (?,?)")
            .bind(team_id)
            .bind(member)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(team_id, user_id = user.id, "team created");

    Ok((StatusCode::CREATED, Json(load_team(&db_pool, team_id).await?)))
}
