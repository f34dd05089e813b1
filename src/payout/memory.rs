use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::models::*;
use super::repository::PayoutStore;
use crate::error::{AppError, AppResult, DistributionError};

/// In-memory payout store, insertion ordered. Test double for `PgPayoutStore`.
pub struct MemoryPayoutStore {
    records: RwLock<Vec<PayoutRecord>>,
    /// Number of upcoming settlements that fail as if the database were unreachable
    failing_settlements: AtomicUsize,
}

impl MemoryPayoutStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            failing_settlements: AtomicUsize::new(0),
        }
    }

    pub async fn insert(
        &self,
        scheduled_date: NaiveDate,
        recipient_address: Option<&str>,
        amount: Decimal,
        status: PayoutStatus,
    ) -> i64 {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(PayoutRecord {
            id,
            scheduled_date,
            recipient_address: recipient_address.map(str::to_string),
            amount,
            status,
            in_flight: None,
            settled_signature: None,
            settled_at: None,
        });
        id
    }

    pub async fn get(&self, id: i64) -> Option<PayoutRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Make the next `count` calls to `mark_settled` fail with `StoreUnavailable`
    pub fn fail_next_settlements(&self, count: usize) {
        self.failing_settlements.store(count, Ordering::SeqCst);
    }

    fn check_settlement_writable(&self) -> AppResult<()> {
        let injected = self
            .failing_settlements
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(DistributionError::StoreUnavailable("connection refused".to_string()).into());
        }
        Ok(())
    }

    async fn update_pending<F>(&self, id: i64, apply: F) -> AppResult<bool>
    where
        F: FnOnce(&mut PayoutRecord),
    {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Payout {} not found", id)))?;

        if record.status != PayoutStatus::Pending {
            return Ok(false);
        }

        apply(record);
        Ok(true)
    }
}

impl Default for MemoryPayoutStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PayoutStore for MemoryPayoutStore {
    async fn fetch_due(&self, as_of: Option<NaiveDate>) -> AppResult<Vec<PayoutRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.is_due(as_of)).cloned().collect())
    }

    async fn mark_submitted(&self, id: i64, signature: &str, valid_until: u64) -> AppResult<()> {
        let updated = self
            .update_pending(id, |record| {
                record.in_flight = Some(InFlightTransfer {
                    signature: signature.to_string(),
                    valid_until,
                });
            })
            .await?;

        if !updated {
            return Err(AppError::NotFound(format!("Pending payout {} not found", id)));
        }
        Ok(())
    }

    async fn clear_submitted(&self, id: i64) -> AppResult<()> {
        self.update_pending(id, |record| record.in_flight = None).await?;
        Ok(())
    }

    async fn mark_settled(&self, record: &PayoutRecord, signature: &str) -> AppResult<bool> {
        self.check_settlement_writable()?;
        self.update_pending(record.id, |stored| {
            stored.status = PayoutStatus::Settled;
            stored.in_flight = None;
            stored.settled_signature = Some(signature.to_string());
            stored.settled_at = Some(Utc::now());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_due_filters_and_orders() {
        let store = MemoryPayoutStore::new();
        let a = store.insert(day(1), Some("A"), dec!(1), PayoutStatus::Pending).await;
        store.insert(day(2), Some("B"), dec!(1), PayoutStatus::Pending).await;
        store.insert(day(1), Some("C"), dec!(1), PayoutStatus::Settled).await;
        let d = store.insert(day(1), None, dec!(1), PayoutStatus::Pending).await;

        let due: Vec<i64> = store.fetch_due(Some(day(1))).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(due, vec![a, d]);

        let all = store.fetch_due(None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_mark_settled_is_one_way() {
        let store = MemoryPayoutStore::new();
        let id = store.insert(day(1), Some("A"), dec!(1), PayoutStatus::Pending).await;
        let record = store.get(id).await.unwrap();

        assert!(store.mark_settled(&record, "sig-1").await.unwrap());
        assert!(!store.mark_settled(&record, "sig-2").await.unwrap());

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Settled);
        assert_eq!(stored.settled_signature.as_deref(), Some("sig-1"));
        assert!(store.mark_submitted(id, "sig-3", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_settlement_failures() {
        let store = MemoryPayoutStore::new();
        let id = store.insert(day(1), Some("A"), dec!(1), PayoutStatus::Pending).await;
        store.mark_submitted(id, "sig", 10).await.unwrap();
        store.fail_next_settlements(1);

        let record = store.get(id).await.unwrap();
        let err = store.mark_settled(&record, "sig").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Distribution(DistributionError::StoreUnavailable(_))
        ));
        assert_eq!(store.get(id).await.unwrap().status, PayoutStatus::Pending);

        assert!(store.mark_settled(&record, "sig").await.unwrap());
        assert_eq!(store.get(id).await.unwrap().in_flight, None);
    }
}
