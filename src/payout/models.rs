use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::BigDecimal, Type, prelude::FromRow};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Payout status enum
///
/// INVARIANT: one-way. `Pending -> Settled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Settled,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "pending"),
            PayoutStatus::Settled => write!(f, "settled"),
        }
    }
}

/// A transfer broadcast by an earlier run whose outcome was never recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightTransfer {
    pub signature: String,
    /// Last ledger height at which the transaction could still land
    pub valid_until: u64,
}

/// Payout entity - one scheduled disbursement to one recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub id: i64,
    pub scheduled_date: NaiveDate,
    pub recipient_address: Option<String>,
    /// Whole asset units, before the decimal exponent is applied
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub in_flight: Option<InFlightTransfer>,
    pub settled_signature: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PayoutRecord {
    /// Due on `as_of`, or unconditionally due when no date gate is applied
    pub fn is_due(&self, as_of: Option<NaiveDate>) -> bool {
        self.status == PayoutStatus::Pending
            && as_of.map_or(true, |date| self.scheduled_date == date)
    }

    /// Reason this record can never be paid as stored, if any.
    ///
    /// Such records are skipped without touching their status so an operator
    /// can correct them and have them picked up by a later run.
    pub fn ineligibility(&self) -> Option<String> {
        match self.recipient_address.as_deref().map(str::trim) {
            None => return Some("recipient address is missing".to_string()),
            Some("") => return Some("recipient address is empty".to_string()),
            Some(_) => {}
        }

        if self.amount <= Decimal::ZERO {
            return Some(format!("amount must be positive, got {}", self.amount));
        }

        None
    }
}

/// Raw `payouts` row as read from Postgres
#[derive(Debug, FromRow)]
pub struct PayoutRow {
    pub id: i64,
    pub scheduled_date: NaiveDate,
    pub wallet_address: Option<String>,
    pub amount: BigDecimal,
    pub status: PayoutStatus,
    pub pending_signature: Option<String>,
    pub pending_valid_until: Option<i64>,
    pub settled_signature: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<PayoutRow> for PayoutRecord {
    type Error = AppError;

    fn try_from(row: PayoutRow) -> AppResult<Self> {
        let amount = Decimal::from_str(&row.amount.to_string())?;

        let in_flight = match (row.pending_signature, row.pending_valid_until) {
            (Some(signature), Some(valid_until)) => Some(InFlightTransfer {
                signature,
                valid_until: u64::try_from(valid_until).map_err(|_| {
                    AppError::InvalidInput(format!(
                        "Negative pending_valid_until on payout {}",
                        row.id
                    ))
                })?,
            }),
            _ => None,
        };

        Ok(PayoutRecord {
            id: row.id,
            scheduled_date: row.scheduled_date,
            recipient_address: row.wallet_address,
            amount,
            status: row.status,
            in_flight,
            settled_signature: row.settled_signature,
            settled_at: row.settled_at,
        })
    }
}
