use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{config::Config, db::UserId, AppError, AppResult, AppState};

use super::Keys;

#[derive(Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access: String,
    pub user: TokenUser,
}

#[debug_handler(state = AppState)]
pub async fn register(
    State(db_pool): State<SqlitePool>,
    State(keys): State<Arc<Keys>>,
    State(config): State<Arc<Config>>,
    Json(RegisterRequest { username, email, password }): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let username = username.trim().to_owned();
    if username.is_empty() || username.len() > 150 {
        return Err(AppError::bad_request("A valid username is required."));
    }
    if password.is_empty() {
        return Err(AppError::bad_request("A password is required."));
    }

    let taken = sqlx::query("SELECT 1 FROM users WHERE username=?")
        .bind(&username)
        .fetch_optional(&db_pool)
        .await?
        .is_some();
    if taken {
        return Err(AppError::bad_request("A user with that username already exists."));
    }

    let cost = config.bcrypt_cost;
    let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;

    let id = sqlx::query("INSERT INTO users (username,email,password_hash) VALUES (?,?,?)")
        .bind(&username)
        .bind(&email)
        .bind(password_hash)
        .execute(&db_pool)
        .await?
        .last_insert_rowid();

    tracing::info!(user_id = id, %username, "registered user");

    let access = keys.issue(id, &username)?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse { access, user: TokenUser { id, username, email } }),
    ))
}

#[debug_handler(state = AppState)]
pub async fn login(
    State(db_pool): State<SqlitePool>,
    State(keys): State<Arc<Keys>>,
    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let invalid = || AppError::bad_request("Invalid credentials.");

    let Some((id, email, password_hash, is_active)): Option<(UserId, String, String, bool)> =
        sqlx::query_as("SELECT id,email,password_hash,is_active FROM users WHERE username=?")
            .bind(&username)
            .fetch_optional(&db_pool)
            .await?
    else {
        return Err(invalid());
    };

    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash))
        .await?
        .unwrap_or(false);
    if !matches {
        return Err(invalid());
    }
    if !is_active {
        return Err(AppError::bad_request("Account disabled."));
    }

    let access = keys.issue(id, &username)?;
    Ok(Json(TokenResponse { access, user: TokenUser { id, username, email } }))
}
