//! sitepulse - site monitoring service.

use sitepulse::config::ServerConfig;
use sitepulse::db::Store;
use sitepulse::monitor::Dispatcher;
use sitepulse::probe::Prober;
use sitepulse::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let cfg = ServerConfig::load();

    // Initialize logging
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("sitepulse={},tower_http=info", cfg.log_level)),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("Starting sitepulse on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        "Probing from {} ({}), timeout {:?}, at most {} concurrent pings",
        cfg.location.location,
        cfg.location.region_code,
        cfg.probe_timeout,
        cfg.max_concurrent_pings
    );

    // Initialize database
    let store = Arc::new(Store::connect(&cfg.db_path, &cfg.db_retry).await?);
    tracing::info!("Database initialized successfully");

    let prober = Prober::new(cfg.probe_timeout)?;
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        prober,
        cfg.location.clone(),
        cfg.max_concurrent_pings,
    ));

    // Start web server
    let server = Server::new(cfg, store, dispatcher);
    server.start().await?;

    Ok(())
}
