use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{info, warn};

use super::models::*;
use crate::error::{AppError, AppResult, DistributionError};

/// Durable payout table
///
/// INVARIANTS:
/// - Every write is durable before the returned future completes
/// - `mark_settled` only ever moves a record from pending to settled
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Pending records due on `as_of` (all pending records when `None`), in insertion order
    async fn fetch_due(&self, as_of: Option<NaiveDate>) -> AppResult<Vec<PayoutRecord>>;

    /// Remember a signed transfer before it is broadcast
    async fn mark_submitted(&self, id: i64, signature: &str, valid_until: u64) -> AppResult<()>;

    /// Forget an in-flight transfer that is known not to have landed
    async fn clear_submitted(&self, id: i64) -> AppResult<()>;

    /// Settle a record. Returns false when it was already settled.
    async fn mark_settled(&self, record: &PayoutRecord, signature: &str) -> AppResult<bool>;
}

/// Payout repository backed by Postgres
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Connectivity failures surface as `StoreUnavailable`; anything else stays a database error.
fn store_error(error: sqlx::Error) -> AppError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DistributionError::StoreUnavailable(error.to_string()).into(),
        other => AppError::Database(other),
    }
}

#[async_trait]
impl PayoutStore for PgPayoutStore {
    async fn fetch_due(&self, as_of: Option<NaiveDate>) -> AppResult<Vec<PayoutRecord>> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT id, scheduled_date, wallet_address, amount, status,
                   pending_signature, pending_valid_until, settled_signature, settled_at
            FROM payouts
            WHERE status = 'pending'
              AND ($1::date IS NULL OR scheduled_date = $1)
            ORDER BY id ASC
            "#
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(PayoutRecord::try_from).collect()
    }

    async fn mark_submitted(&self, id: i64, signature: &str, valid_until: u64) -> AppResult<()> {
        let valid_until = i64::try_from(valid_until)
            .map_err(|_| AppError::InvalidInput(format!("Block height out of range: {}", valid_until)))?;

        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET pending_signature = $2, pending_valid_until = $3
            WHERE id = $1 AND status = 'pending'
            "#
        )
        .bind(id)
        .bind(signature)
        .bind(valid_until)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Pending payout {} not found", id)));
        }

        Ok(())
    }

    async fn clear_submitted(&self, id: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payouts
            SET pending_signature = NULL, pending_valid_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn mark_settled(&self, record: &PayoutRecord, signature: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'settled',
                settled_signature = $2,
                settled_at = NOW(),
                pending_signature = NULL,
                pending_valid_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#
        )
        .bind(record.id)
        .bind(signature)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            warn!("Payout {} was already settled", record.id);
            return Ok(false);
        }

        info!(
            "Status updated successfully for payout {} (wallet: {:?})",
            record.id, record.recipient_address
        );
        Ok(true)
    }
}
