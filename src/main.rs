mod api;
mod bootstrap;
mod config;
mod error;
mod execution;
mod payout;
mod server;
mod settlement;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,distributor=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting token distributor");

    // Load configuration
    let config = config::Config::from_env().context("failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    let app = bootstrap::initialize_app(&config)
        .await
        .context("failed to initialize application")?;

    let engine = app.state.engine.clone();
    let cancel = engine.cancel_handle();
    let scheduler = app.scheduler.start()?;

    let router = server::create_app(app.state);

    // Stop between records on shutdown; a record in flight is finished first
    let shutdown = async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, cancelling distribution after the current record");
            cancel.cancel();
        }
    };

    server::run_server(router, &config.bind_address, shutdown)
        .await
        .context("HTTP server failed")?;

    engine.wait_idle().await;
    scheduler.abort();
    info!("👋 Distributor stopped");

    Ok(())
}
