// Distribution engine, retry policy and daily scheduler
pub mod engine;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{DistributionEngine, EngineConfig, LiquidityPolicy, RunSummary};
pub use retry::RetryPolicy;
pub use scheduler::{DistributionScheduleConfig, DistributionScheduler};
