pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod presence;
pub mod profiles;
pub mod ratelimit;
pub mod rooms;
pub mod teams;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};

use auth::{CredentialResolver, Keys};
use config::Config;
use presence::PresenceStore;
use ratelimit::RateLimiter;
use rooms::{msg::SqliteMessageStore, Gateway};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub keys: Arc<Keys>,
    pub resolver: Arc<CredentialResolver>,
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        let keys = Arc::new(Keys::new(&config.jwt_secret, config.access_token_ttl));
        let resolver = Arc::new(CredentialResolver::new(keys.clone(), db_pool.clone()));
        let gateway = Gateway::new(
            resolver.clone(),
            Arc::new(PresenceStore::new(db_pool.clone())),
            Arc::new(RateLimiter::new(config.rate_limit_max, config.rate_limit_window)),
            Arc::new(SqliteMessageStore::new(db_pool.clone())),
            config.outbound_buffer,
        );

        AppState {
            db_pool,
            config: Arc::new(config),
            keys,
            resolver,
            gateway,
        }
    }
}

pub fn app(app_state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::router())
        .nest("/profile", profiles::router())
        .nest("/teams", teams::router())
        .nest("/channels", rooms::router());

    Router::new()
        .nest("/api", api)
        .nest("/ws", rooms::ws_router())
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
