//! partner_hub_server - REST server for the channel-partner program.
//!
//! Configuration is read from the environment (and `.env` when present);
//! see [`partner_hub_server::config`] for the variables.

use std::sync::Arc;

use anyhow::Context;
use partner_hub_core::memory::MemoryStore;
use partner_hub_core::service::{ProgramService, ProgramServiceImpl};
use partner_hub_server::config::ServerConfig;
use partner_hub_server::middleware::jwt::JwtConfig;
use partner_hub_server::router::build_router;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,partner_hub_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let rates = config.exchange_rates()?;

    let service: Arc<dyn ProgramService> =
        Arc::new(build_service(&config).await?.with_exchange_rates(rates));

    let jwt_config = JwtConfig::from_secret(config.jwt_secret.as_bytes());
    let app = build_router(service, jwt_config);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("partner_hub_server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

#[cfg(feature = "database")]
async fn build_service(config: &ServerConfig) -> anyhow::Result<ProgramServiceImpl> {
    use partner_hub_postgres::PgProgramStore;

    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("PARTNER_HUB_DATABASE_URL not set, using in-memory store");
        return Ok(ProgramServiceImpl::from_store(Arc::new(MemoryStore::new())));
    };

    let store = PgProgramStore::connect(url, config.db_pool_size)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to apply migrations")?;
    tracing::info!(pool_size = config.db_pool_size, "connected to database");

    Ok(ProgramServiceImpl::from_store(Arc::new(store)))
}

#[cfg(not(feature = "database"))]
async fn build_service(config: &ServerConfig) -> anyhow::Result<ProgramServiceImpl> {
    if config.database_url.is_some() {
        tracing::warn!("built without the `database` feature; ignoring PARTNER_HUB_DATABASE_URL");
    }
    Ok(ProgramServiceImpl::from_store(Arc::new(MemoryStore::new())))
}
