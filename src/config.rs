use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::settlement::LiquidityPolicy;

#[derive(Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub solana_rpc_url: String,
    /// Mint of the distributed SPL token
    pub mint_address: String,
    /// Base58 secret key or a JSON byte array (solana-keygen format)
    pub sender_private_key: String,
    pub retry_max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Hour of day (in the distribution timezone) at which the daily run fires
    pub execution_hour: u32,
    /// Offset of the distribution calendar from UTC
    pub utc_offset_hours: i32,
    pub date_gating: bool,
    pub liquidity_policy: LiquidityPolicy,
    pub run_on_startup: bool,
    pub confirmation_timeout_secs: u64,
    pub expiry_grace_blocks: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let config: Config = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/distributor")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("solana_rpc_url", "https://api.mainnet-beta.solana.com")?
            .set_default("retry_max_attempts", 10)?
            .set_default("retry_delay_ms", 5000)?
            .set_default("execution_hour", 0)?
            .set_default("utc_offset_hours", 1)?
            .set_default("date_gating", true)?
            .set_default("liquidity_policy", "halt")?
            .set_default("run_on_startup", true)?
            .set_default("confirmation_timeout_secs", 90)?
            .set_default("expiry_grace_blocks", 5)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.mint_address.trim().is_empty() {
            return Err(AppError::Config("MINT_ADDRESS must be set".to_string()));
        }
        if self.sender_private_key.trim().is_empty() {
            return Err(AppError::Config("SENDER_PRIVATE_KEY must be set".to_string()));
        }
        if self.retry_max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        if self.execution_hour > 23 {
            return Err(AppError::Config(format!(
                "EXECUTION_HOUR must be between 0 and 23, got {}",
                self.execution_hour
            )));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(AppError::Config(format!(
                "UTC_OFFSET_HOURS out of range: {}",
                self.utc_offset_hours
            )));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("solana_rpc_url", &self.solana_rpc_url)
            .field("mint_address", &self.mint_address)
            .field("sender_private_key", &"<redacted>")
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("execution_hour", &self.execution_hour)
            .field("utc_offset_hours", &self.utc_offset_hours)
            .field("date_gating", &self.date_gating)
            .field("liquidity_policy", &self.liquidity_policy)
            .field("run_on_startup", &self.run_on_startup)
            .finish_non_exhaustive()
    }
}
