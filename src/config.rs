use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

/// Runtime settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub presence_stale_after: Duration,
    pub presence_sweep_every: Duration,
    pub outbound_buffer: usize,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: dotenv::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://teamchat.db?mode=rwc".to_owned()),
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080".parse::<SocketAddr>()?)?,
            jwt_secret: dotenv::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            access_token_ttl: Duration::from_secs(var_or("ACCESS_TOKEN_TTL_SECS", 3600)?),
            rate_limit_max: var_or("RATE_LIMIT_MAX", 20)?,
            rate_limit_window: Duration::from_secs(var_or("RATE_LIMIT_WINDOW_SECS", 60)?),
            presence_stale_after: Duration::from_secs(var_or("PRESENCE_STALE_SECS", 300)?),
            presence_sweep_every: Duration::from_secs(var_or("PRESENCE_SWEEP_SECS", 300)?),
            outbound_buffer: var_or("OUTBOUND_BUFFER", 256)?,
            bcrypt_cost: var_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
        })
    }

    /// Settings for tests and local tooling; never reads the environment.
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_owned(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: "test-secret".to_owned(),
            access_token_ttl: Duration::from_secs(3600),
            rate_limit_max: 20,
            rate_limit_window: Duration::from_secs(60),
            presence_stale_after: Duration::from_secs(300),
            presence_sweep_every: Duration::from_secs(300),
            outbound_buffer: 64,
            bcrypt_cost: 4,
        }
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
