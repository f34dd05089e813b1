use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Ledger transaction identifier (a signature on Solana)
pub type TransactionId = String;

/// Holding account of `owner` for one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub owner: String,
    pub asset: String,
    pub address: String,
}

/// A transfer between two holding accounts, in raw (exponent-applied) units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInstruction {
    pub source: AccountRef,
    pub destination: AccountRef,
    pub raw_amount: u64,
}

/// Reference point a transaction must cite to be accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityAnchor {
    pub reference: String,
    /// Last ledger height at which a transaction citing `reference` can land
    pub last_valid_height: u64,
}

/// A signed, not yet broadcast transfer. The id is final at this point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub id: TransactionId,
    pub anchor: ValidityAnchor,
}

/// Final state of a submitted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Confirmed,
    /// The anchor went stale without the transaction landing
    Expired,
    Rejected(String),
}

/// Capability surface over a distributed ledger
///
/// INVARIANTS:
/// - `resolve_or_create_holding_account` is idempotent
/// - `submit` may be repeated for the same `SignedTransfer`; the ledger applies it at most once
/// - `confirm` never reports `Expired` while the transaction can still land
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address of the account that signs and pays for transfers
    fn sender(&self) -> String;

    async fn resolve_or_create_holding_account(&self, owner: &str, asset: &str) -> AppResult<AccountRef>;

    /// Decimal exponent of the asset (immutable metadata)
    async fn decimal_exponent(&self, asset: &str) -> AppResult<u32>;

    /// Current spendable balance of the sender, in whole units
    async fn sender_liquidity(&self, asset: &str) -> AppResult<Decimal>;

    /// Pure construction, no I/O
    fn build_transfer(&self, from: &AccountRef, to: &AccountRef, raw_amount: u64) -> TransferInstruction {
        TransferInstruction {
            source: from.clone(),
            destination: to.clone(),
            raw_amount,
        }
    }

    /// Anchor the transfer to the current validity window and sign it
    async fn sign_with_fresh_anchor(&self, instruction: &TransferInstruction) -> AppResult<SignedTransfer>;

    /// Broadcast a signed transfer.
    ///
    /// Fails with `LedgerError::ValidityWindowExpired` when the anchor is no
    /// longer accepted; the transfer must then be re-signed with a fresh anchor.
    async fn submit(&self, signed: &SignedTransfer) -> AppResult<TransactionId>;

    /// Poll until the transaction is final or its validity window has passed
    async fn confirm(&self, id: &str, last_valid_height: u64) -> AppResult<TransferOutcome>;
}
