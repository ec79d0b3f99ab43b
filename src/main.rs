use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use teamchat::{app, config::Config, db, presence, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("teamchat=info,tower_http=info")),
        )
        .init();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    db::init_schema(&db_pool).await.context("creating schema")?;

    let bind_addr = config.bind_addr;
    let (sweep_every, stale_after) = (config.presence_sweep_every, config.presence_stale_after);
    let app_state = AppState::new(db_pool, config);

    presence::spawn_sweeper(
        app_state.gateway.presence().clone(),
        app_state.gateway.limiter().clone(),
        sweep_every,
        stale_after,
    );

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
