use anyhow::Context;
use studyrooms::{config::Config, db, group::Groups, AppState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studyrooms=info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    db::migrate(&db_pool).await.context("failed to run migrations")?;

    let app_state = AppState {
        db_pool,
        groups: Groups::new(config.channel_capacity),
    };
    let app = studyrooms::app(app_state, time::Duration::minutes(config.session_inactivity_minutes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
