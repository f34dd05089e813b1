use std::{sync::Arc, time::Duration};
use solana_sdk::signature::Signer;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    execution::solana::{parse_keypair, SolanaConfig, SolanaLedgerClient},
    payout::PgPayoutStore,
    settlement::{
        DistributionEngine, DistributionScheduleConfig, DistributionScheduler, EngineConfig,
        RetryPolicy,
    },
};

pub struct App {
    pub state: AppState,
    pub scheduler: DistributionScheduler,
}

pub async fn initialize_app(config: &Config) -> AppResult<App> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;
    let store = Arc::new(PgPayoutStore::new(pool));

    // Ledger client
    let keypair = parse_keypair(&config.sender_private_key)?;
    info!("🔑 Sender wallet: {}", keypair.pubkey());

    let solana_config = SolanaConfig {
        rpc_url: config.solana_rpc_url.clone(),
        confirmation_timeout: config.confirmation_timeout(),
        expiry_grace_blocks: config.expiry_grace_blocks,
        ..SolanaConfig::default()
    };
    let ledger = Arc::new(SolanaLedgerClient::new(solana_config, keypair));
    info!("✅ Solana ledger client initialized ({})", config.solana_rpc_url);

    // Distribution engine
    let engine_config = EngineConfig {
        asset: config.mint_address.clone(),
        liquidity_policy: config.liquidity_policy,
        retry: RetryPolicy::new(config.retry_max_attempts, config.retry_delay()),
    };
    let engine = Arc::new(DistributionEngine::new(engine_config, store, ledger));
    info!(
        "✅ Distribution engine initialized (mint: {}, liquidity policy: {:?})",
        config.mint_address, config.liquidity_policy
    );

    let scheduler = DistributionScheduler::new(
        DistributionScheduleConfig {
            execution_hour: config.execution_hour,
            utc_offset_hours: config.utc_offset_hours,
            date_gating: config.date_gating,
            run_on_startup: config.run_on_startup,
        },
        engine.clone(),
    );

    Ok(App {
        state: AppState { engine },
        scheduler,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 10 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
