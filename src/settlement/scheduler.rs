// Distribution Scheduler - fires the daily distribution run
//
// - Runs once on startup (optional), then daily at the configured hour
// - The hour and the "today" used for date gating are taken in the
//   distribution timezone (fixed UTC offset), not in UTC
// - A run that is still going when the next trigger fires is not doubled,
//   the engine rejects it with RunInProgress

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, DistributionError};
use crate::settlement::engine::{DistributionEngine, RunSummary};

/// Distribution schedule configuration
#[derive(Debug, Clone)]
pub struct DistributionScheduleConfig {
    /// Hour (0-23, in the distribution timezone) to execute the run
    pub execution_hour: u32,
    /// Offset of the distribution timezone from UTC, in hours
    pub utc_offset_hours: i32,
    /// Only pay records scheduled for "today"
    pub date_gating: bool,
    pub run_on_startup: bool,
}

impl DistributionScheduleConfig {
    pub fn offset(&self) -> AppResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Config(format!("Invalid UTC offset: {}", self.utc_offset_hours))
        })
    }
}

/// Distribution scheduler - coordinates the daily payout run
pub struct DistributionScheduler {
    config: DistributionScheduleConfig,
    engine: Arc<DistributionEngine>,
}

impl DistributionScheduler {
    pub fn new(config: DistributionScheduleConfig, engine: Arc<DistributionEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> AppResult<JoinHandle<()>> {
        let config = self.config.clone();
        let engine = self.engine.clone();
        let offset = config.offset()?;

        Ok(tokio::spawn(async move {
            if config.run_on_startup {
                info!("🚀 Running startup distribution");
                Self::trigger(&config, &engine, offset, Utc::now()).await;
            }

            Self::run_daily_scheduler(&config, &engine, offset).await
        }))
    }

    /// Daily scheduler - runs once per day at configured hour
    async fn run_daily_scheduler(
        config: &DistributionScheduleConfig,
        engine: &Arc<DistributionEngine>,
        offset: FixedOffset,
    ) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour, offset);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next distribution scheduled for: {}",
                    next_execution.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S %:z")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            info!("🔄 Starting daily distribution cycle");
            Self::trigger(config, engine, offset, Utc::now()).await;
        }
    }

    async fn trigger(
        config: &DistributionScheduleConfig,
        engine: &Arc<DistributionEngine>,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Option<RunSummary> {
        let as_of = Self::run_date(config, offset, now);

        match engine.run(as_of).await {
            Ok(summary) => Some(summary),
            Err(AppError::Distribution(DistributionError::RunInProgress)) => {
                warn!("Previous distribution run still in progress, skipping this trigger");
                None
            }
            Err(e) => {
                error!("❌ Distribution run failed to start: {:?}", e);
                None
            }
        }
    }

    /// The date filter handed to the engine
    fn run_date(config: &DistributionScheduleConfig, offset: FixedOffset, now: DateTime<Utc>) -> Option<NaiveDate> {
        config
            .date_gating
            .then(|| now.with_timezone(&offset).date_naive())
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(
        now: DateTime<Utc>,
        execution_hour: u32,
        offset: FixedOffset,
    ) -> DateTime<Utc> {
        let local_today = now.with_timezone(&offset).date_naive();

        let at_hour = |date: NaiveDate| {
            date.and_hms_opt(execution_hour, 0, 0)
                .and_then(|naive| offset.from_local_datetime(&naive).single())
                .map(|local| local.with_timezone(&Utc))
        };

        match at_hour(local_today) {
            Some(next) if next > now => next,
            // Execution time has passed today, schedule for tomorrow
            _ => at_hour(local_today + ChronoDuration::days(1))
                .unwrap_or_else(|| now + ChronoDuration::days(1)),
        }
    }
}
