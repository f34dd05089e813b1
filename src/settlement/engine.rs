// Distribution Engine - turns due payout records into ledger transfers
//
// Per-record flow (strictly sequential, one record fully finished before the next):
// 1. Skip records that can never be paid as stored (no recipient, amount <= 0)
// 2. Reconcile a transfer left in flight by an earlier run
// 3. Convert whole units to raw units with the asset's decimal exponent
// 4. Check sender liquidity (re-queried for every record)
// 5. Resolve/create holding accounts, build the transfer
// 6. Sign with a fresh validity anchor, persist the signature, broadcast
// 7. Confirm; settle in the store before moving on

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, DistributionError, LedgerError},
    execution::client::{AccountRef, LedgerClient, SignedTransfer, TransferOutcome},
    payout::{InFlightTransfer, PayoutRecord, PayoutStore},
    settlement::retry::RetryPolicy,
};

/// What to do when the sender cannot cover a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityPolicy {
    /// Stop the run; later records wait for the next run
    Halt,
    /// Skip only this record and keep going
    Skip,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Asset identifier (SPL mint address)
    pub asset: String,
    pub liquidity_policy: LiquidityPolicy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Halted(String),
    Aborted(String),
    Cancelled,
}

/// Run summary handed back to the trigger
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub as_of: Option<NaiveDate>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub settled: u32,
    /// Settled by confirming a transfer an earlier run left in flight
    pub reconciled: u32,
    pub skipped: u32,
    pub failed: u32,
    pub status: RunStatus,
}

impl RunSummary {
    fn start(as_of: Option<NaiveDate>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            as_of,
            started_at: Utc::now(),
            finished_at: None,
            settled: 0,
            reconciled: 0,
            skipped: 0,
            failed: 0,
            status: RunStatus::Completed,
        }
    }

    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Settled => self.settled += 1,
            RecordOutcome::Reconciled => self.reconciled += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Settled,
    Reconciled,
    Skipped,
    Failed,
}

/// Per-run cache
struct RunContext {
    decimal_exponent: u32,
    sender_account: Option<AccountRef>,
}

/// Cooperative cancellation, honoured between records only.
///
/// Meant for shutdown: the flag is never cleared, so every later run on the
/// same engine ends as `Cancelled` before touching a record.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Convert whole units to raw ledger units. Fails when the amount cannot be
/// represented exactly.
pub fn to_raw_amount(amount: Decimal, decimal_exponent: u32) -> Result<u64, String> {
    let scale = 10u64
        .checked_pow(decimal_exponent)
        .ok_or_else(|| format!("decimal exponent {} is out of range", decimal_exponent))?;

    let raw = amount
        .checked_mul(Decimal::from(scale))
        .ok_or_else(|| format!("amount {} overflows", amount))?;

    if !raw.fract().is_zero() {
        return Err(format!(
            "amount {} has more than {} decimal places",
            amount, decimal_exponent
        ));
    }

    raw.to_u64()
        .ok_or_else(|| format!("amount {} does not fit the ledger's range", amount))
}

/// Spendable raw units for a whole-unit balance, rounded down
fn liquidity_to_raw(liquidity: Decimal, decimal_exponent: u32) -> u64 {
    if liquidity <= Decimal::ZERO {
        return 0;
    }
    let scale = match 10u64.checked_pow(decimal_exponent) {
        Some(scale) => Decimal::from(scale),
        None => return u64::MAX,
    };
    liquidity
        .checked_mul(scale)
        .and_then(|raw| raw.trunc().to_u64())
        .unwrap_or(u64::MAX)
}

/// Exhausted store retries mean the store is unavailable
fn store_unavailable(error: AppError) -> AppError {
    match error {
        AppError::Distribution(DistributionError::RetryExhausted {
            operation,
            last_error,
            ..
        }) => DistributionError::StoreUnavailable(format!("{}: {}", operation, last_error)).into(),
        other => other,
    }
}

pub struct DistributionEngine {
    config: EngineConfig,
    store: Arc<dyn PayoutStore>,
    ledger: Arc<dyn LedgerClient>,
    run_lock: Mutex<()>,
    cancel: CancelHandle,
    last_summary: RwLock<Option<RunSummary>>,
}

impl DistributionEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn PayoutStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            config,
            store,
            ledger,
            run_lock: Mutex::new(()),
            cancel: CancelHandle::default(),
            last_summary: RwLock::new(None),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.read().await.clone()
    }

    /// Resolves once no run is in progress
    pub async fn wait_idle(&self) {
        let _guard = self.run_lock.lock().await;
    }

    pub async fn due_payouts(&self, as_of: Option<NaiveDate>) -> AppResult<Vec<PayoutRecord>> {
        self.store.fetch_due(as_of).await
    }

    /// Run one distribution pass over the records due on `as_of` (all pending
    /// records when `None`).
    ///
    /// Returns `Err` when the run could not start. Failures after the first
    /// record was touched end the run with `RunStatus::Aborted` or `Halted`
    /// and keep the counts of what was already done.
    #[instrument(skip(self))]
    pub async fn run(&self, as_of: Option<NaiveDate>) -> AppResult<RunSummary> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| DistributionError::RunInProgress)?;

        let mut summary = RunSummary::start(as_of);
        info!("🔄 Starting distribution run {}", summary.run_id);

        let retry = self.config.retry;
        let due = retry
            .run("fetch_due", || self.store.fetch_due(as_of))
            .await
            .map_err(store_unavailable)?;

        if due.is_empty() {
            info!("✓ No payouts due");
            return Ok(self.finish(summary).await);
        }

        info!("📊 Found {} due payouts", due.len());

        let decimal_exponent = retry
            .run("decimal_exponent", || self.ledger.decimal_exponent(&self.config.asset))
            .await?;

        let mut ctx = RunContext {
            decimal_exponent,
            sender_account: None,
        };

        for record in &due {
            if self.cancel.is_cancelled() {
                warn!("Run {} cancelled before payout {}", summary.run_id, record.id);
                summary.status = RunStatus::Cancelled;
                break;
            }

            // The store is not trusted to have filtered correctly
            if !record.is_due(as_of) {
                warn!(
                    "Payout {} returned by the store is not due (status: {}), ignoring",
                    record.id, record.status
                );
                continue;
            }

            match self.process_record(&mut ctx, record).await {
                Ok(outcome) => summary.count(outcome),
                Err(AppError::Distribution(e @ DistributionError::InsufficientLiquidity { .. })) => {
                    error!("INSUFFICIENT FUNDS for payout {}: {}. Halting run", record.id, e);
                    summary.skipped += 1;
                    summary.status = RunStatus::Halted(e.to_string());
                    break;
                }
                Err(e) => {
                    error!("❌ Run {} aborted at payout {}: {}", summary.run_id, record.id, e);
                    summary.failed += 1;
                    summary.status = RunStatus::Aborted(e.to_string());
                    break;
                }
            }
        }

        Ok(self.finish(summary).await)
    }

    async fn finish(&self, mut summary: RunSummary) -> RunSummary {
        summary.finished_at = Some(Utc::now());

        info!(
            "✓ Distribution run {} finished: settled={} reconciled={} skipped={} failed={} status={:?}",
            summary.run_id,
            summary.settled,
            summary.reconciled,
            summary.skipped,
            summary.failed,
            summary.status
        );

        *self.last_summary.write().await = Some(summary.clone());
        summary
    }

    /// Drive one record through its state machine.
    ///
    /// `Ok` covers every per-record outcome; `Err` means the run must stop.
    async fn process_record(&self, ctx: &mut RunContext, record: &PayoutRecord) -> AppResult<RecordOutcome> {
        let recipient = match (record.ineligibility(), record.recipient_address.as_deref()) {
            (None, Some(recipient)) => recipient.trim(),
            (reason, _) => {
                warn!(
                    "⏭️ Skipping payout {}: {}",
                    record.id,
                    reason.unwrap_or_else(|| "recipient address is missing".to_string())
                );
                return Ok(RecordOutcome::Skipped);
            }
        };

        if let Some(in_flight) = &record.in_flight {
            if self.reconcile(record, in_flight).await? {
                return Ok(RecordOutcome::Reconciled);
            }
        }

        let raw_amount = match to_raw_amount(record.amount, ctx.decimal_exponent) {
            Ok(raw) => raw,
            Err(reason) => {
                let e = DistributionError::InvalidRecord {
                    id: record.id,
                    reason,
                };
                warn!("⏭️ Skipping payout: {}", e);
                return Ok(RecordOutcome::Skipped);
            }
        };

        let retry = self.config.retry;
        let asset = self.config.asset.as_str();

        let liquidity = retry
            .run("sender_liquidity", || self.ledger.sender_liquidity(asset))
            .await?;
        let available = liquidity_to_raw(liquidity, ctx.decimal_exponent);

        if raw_amount > available {
            let e = DistributionError::InsufficientLiquidity {
                required: raw_amount,
                available,
            };
            return match self.config.liquidity_policy {
                LiquidityPolicy::Halt => Err(e.into()),
                LiquidityPolicy::Skip => {
                    warn!("⏭️ Skipping payout {}: {}", record.id, e);
                    Ok(RecordOutcome::Skipped)
                }
            };
        }

        let source = match &ctx.sender_account {
            Some(account) => account.clone(),
            None => {
                let sender = self.ledger.sender();
                let account = retry
                    .run("resolve_sender_account", || {
                        self.ledger.resolve_or_create_holding_account(&sender, asset)
                    })
                    .await?;
                ctx.sender_account = Some(account.clone());
                account
            }
        };

        let destination = match retry
            .run("resolve_recipient_account", || {
                self.ledger.resolve_or_create_holding_account(recipient, asset)
            })
            .await
        {
            Ok(account) => account,
            Err(e) if e.is_record_level() => {
                warn!("⏭️ Skipping payout {}: {}", record.id, e);
                return Ok(RecordOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let instruction = self.ledger.build_transfer(&source, &destination, raw_amount);

        for attempt in 1..=retry.max_attempts {
            let signed = retry
                .run("sign_transfer", || self.ledger.sign_with_fresh_anchor(&instruction))
                .await?;

            // Persisted before broadcast so a crash after this point is recoverable
            retry
                .run("mark_submitted", || {
                    self.store
                        .mark_submitted(record.id, &signed.id, signed.anchor.last_valid_height)
                })
                .await
                .map_err(store_unavailable)?;

            info!(
                "ABOUT TO SEND TRANSACTION {} for payout {}: {} raw units to {} (attempt {})",
                signed.id, record.id, raw_amount, recipient, attempt
            );

            match retry.run("submit", || self.ledger.submit(&signed)).await {
                Ok(_) => {}
                Err(AppError::Ledger(LedgerError::ValidityWindowExpired)) => {
                    warn!(
                        "Validity window expired before {} was accepted, rebuilding with a fresh anchor",
                        signed.id
                    );
                    self.clear_in_flight(record).await?;
                    continue;
                }
                Err(AppError::Ledger(LedgerError::Rejected(reason))) => {
                    error!("❌ Transfer for payout {} rejected: {}", record.id, reason);
                    self.clear_in_flight(record).await?;
                    return Ok(RecordOutcome::Failed);
                }
                // Outcome unknown; the in-flight marker stays for the next run
                Err(e) => return Err(e),
            }

            match self.confirm(&signed).await? {
                TransferOutcome::Confirmed => {
                    info!("TX HASH > https://solscan.io/tx/{}", signed.id);
                    self.settle(record, &signed.id).await?;
                    return Ok(RecordOutcome::Settled);
                }
                TransferOutcome::Expired => {
                    warn!(
                        "Transfer {} for payout {} expired unconfirmed, rebuilding with a fresh anchor",
                        signed.id, record.id
                    );
                    self.clear_in_flight(record).await?;
                }
                TransferOutcome::Rejected(reason) => {
                    error!("❌ Transfer {} for payout {} rejected: {}", signed.id, record.id, reason);
                    self.clear_in_flight(record).await?;
                    return Ok(RecordOutcome::Failed);
                }
            }
        }

        Err(DistributionError::RetryExhausted {
            operation: format!("transfer for payout {}", record.id),
            attempts: retry.max_attempts,
            last_error: LedgerError::ValidityWindowExpired.to_string(),
        }
        .into())
    }

    /// Settle a record whose earlier transfer landed. Returns false when the
    /// transfer never landed and the record has to be paid again.
    async fn reconcile(&self, record: &PayoutRecord, in_flight: &InFlightTransfer) -> AppResult<bool> {
        info!(
            "Reconciling transfer {} left in flight for payout {}",
            in_flight.signature, record.id
        );

        let outcome = self
            .config
            .retry
            .run("confirm", || {
                self.ledger.confirm(&in_flight.signature, in_flight.valid_until)
            })
            .await?;

        match outcome {
            TransferOutcome::Confirmed => {
                info!(
                    "Transfer {} had landed, settling payout {} without resubmitting",
                    in_flight.signature, record.id
                );
                self.settle(record, &in_flight.signature).await?;
                Ok(true)
            }
            TransferOutcome::Expired | TransferOutcome::Rejected(_) => {
                warn!(
                    "Transfer {} for payout {} never landed ({:?}), paying again",
                    in_flight.signature, record.id, outcome
                );
                self.clear_in_flight(record).await?;
                Ok(false)
            }
        }
    }

    async fn confirm(&self, signed: &SignedTransfer) -> AppResult<TransferOutcome> {
        self.config
            .retry
            .run("confirm", || {
                self.ledger.confirm(&signed.id, signed.anchor.last_valid_height)
            })
            .await
    }

    async fn settle(&self, record: &PayoutRecord, signature: &str) -> AppResult<()> {
        let transitioned = self
            .config
            .retry
            .run("mark_settled", || self.store.mark_settled(record, signature))
            .await
            .map_err(store_unavailable)?;

        if !transitioned {
            warn!("Payout {} was already settled when recording {}", record.id, signature);
        }
        Ok(())
    }

    async fn clear_in_flight(&self, record: &PayoutRecord) -> AppResult<()> {
        self.config
            .retry
            .run("clear_submitted", || self.store.clear_submitted(record.id))
            .await
            .map_err(store_unavailable)
    }
}
