//! Bearer-token credentials.
//!
//! [`Keys`] issues and verifies HS256 access tokens; [`CredentialResolver`]
//! turns a raw bearer token into the [`Identity`] it names, or
//! [`Principal::Anonymous`] when anything about the token is off.

mod login;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    routing::post,
    Router,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{db::{self, UserId}, AppError, AppState};

pub use login::{login, register};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(login::register))
        .route("/login", post(login::login))
}

/// An authenticated user, as loaded from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(Identity),
    Anonymous,
}

impl Principal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Principal::User(identity) => Some(identity),
            Principal::Anonymous => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Keys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Keys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: UserId, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = db::now().max(0) as u64;
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_owned(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Resolves bearer tokens against the signing key and the user table.
///
/// Stateless; every failure (bad signature, expired, malformed subject,
/// unknown or deactivated user, database hiccup) degrades to anonymous.
pub struct CredentialResolver {
    keys: Arc<Keys>,
    db_pool: SqlitePool,
}

impl CredentialResolver {
    pub fn new(keys: Arc<Keys>, db_pool: SqlitePool) -> Self {
        CredentialResolver { keys, db_pool }
    }

    pub async fn resolve(&self, raw_token: Option<&str>) -> Principal {
        let Some(token) = raw_token else {
            return Principal::Anonymous;
        };

        let claims = match self.keys.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "jwt validation failed");
                return Principal::Anonymous;
            }
        };
        let Ok(user_id) = claims.sub.parse::<UserId>() else {
            tracing::debug!(sub = %claims.sub, "jwt subject is not a user id");
            return Principal::Anonymous;
        };

        let row: Result<Option<(String, Option<String>)>, _> =
            sqlx::query_as("SELECT username,avatar FROM users WHERE id=? AND is_active=1")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await;
        match row {
            Ok(Some((username, avatar))) => Principal::User(Identity { id: user_id, username, avatar }),
            Ok(None) => {
                tracing::debug!(user_id, "token names unknown or inactive user");
                Principal::Anonymous
            }
            Err(e) => {
                tracing::warn!(error = %e, "user lookup failed during token resolution");
                Principal::Anonymous
            }
        }
    }
}

/// Pulls `<token>` out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for REST routes that require a signed-in user.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<CredentialResolver>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<CredentialResolver>::from_ref(state);
        match resolver.resolve(bearer_token(&parts.headers)).await {
            Principal::User(identity) => Ok(AuthUser(identity)),
            Principal::Anonymous => Err(AppError::unauthorized()),
        }
    }
}
