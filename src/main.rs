//! domain-proxy - Host-header reverse proxy
//!
//! This is the composition root that wires together all the components.

use domain_proxy::infrastructure::shutdown_signal;
use domain_proxy::{
    build_router, load_config, ApiState, Dispatcher, HttpServer, Registry, ShutdownController,
    SqliteRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;
    cfg.validate()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting domain-proxy listen={} db={} api_domain={}",
        cfg.listen_addr(),
        cfg.db_path,
        cfg.api_domain
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapter: the registry
    let sqlite = Arc::new(SqliteRegistry::open(&cfg.db_path)?);
    let registry: Arc<dyn Registry> = sqlite.clone();

    // 2. Application service
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Duration::from_secs(cfg.backend_connect_timeout_secs),
    )?);

    // 3. Inbound adapter
    let shutdown = ShutdownController::new();
    let api = ApiState::new(registry, &cfg.api_key, &cfg.api_domain);
    let router = build_router(dispatcher, api, shutdown.clone());
    let server = HttpServer::new(cfg.listen_addr(), router);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = server
        .run(shutdown, Duration::from_secs(cfg.shutdown_drain_secs))
        .await;

    // Close the registry even when serving failed
    if let Err(e) = sqlite.close() {
        tracing::error!("failed to close registry: {}", e);
    }
    tracing::info!("domain-proxy stopped");

    result
}
