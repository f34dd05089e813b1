#[cfg(test)]
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(test)]
pub use memory::MemoryPayoutStore;
pub use models::{InFlightTransfer, PayoutRecord, PayoutStatus};
pub use repository::{PayoutStore, PgPayoutStore};
