// Scripted in-process ledger for engine tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{AppError, AppResult, LedgerError};
use crate::execution::client::*;
use crate::settlement::engine::CancelHandle;

pub const SENDER: &str = "SENDER";

/// Injected behaviour for the next `submit` or `confirm` call
#[derive(Debug, Clone)]
pub enum Scripted {
    RpcFailure,
    WindowExpired,
    Rejected(&'static str),
}

#[derive(Default)]
struct MockState {
    exponent: u32,
    balance_raw: u64,
    height: u64,
    next_id: u64,
    signed: HashMap<String, TransferInstruction>,
    broadcast: Vec<String>,
    applied: HashMap<String, (String, u64)>,
    applied_order: Vec<(String, u64)>,
    /// Outcomes of transactions broadcast before this ledger instance existed
    foreign: HashMap<String, TransferOutcome>,
    submit_script: VecDeque<Scripted>,
    confirm_script: VecDeque<Scripted>,
    liquidity_failures: u32,
    invalid_owners: Vec<String>,
    sign_calls: u32,
    /// Cancelled while a transfer is being confirmed
    cancel_on_confirm: Option<CancelHandle>,
}

pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    /// `balance` is in whole units
    pub fn new(exponent: u32, balance: u64) -> Self {
        let state = MockState {
            exponent,
            balance_raw: balance * 10u64.pow(exponent),
            height: 100,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn script_submit(&self, step: Scripted) {
        self.state().submit_script.push_back(step);
    }

    pub fn script_confirm(&self, step: Scripted) {
        self.state().confirm_script.push_back(step);
    }

    pub fn fail_liquidity_queries(&self, count: u32) {
        self.state().liquidity_failures = count;
    }

    pub fn reject_owner(&self, owner: &str) {
        self.state().invalid_owners.push(owner.to_string());
    }

    /// Request cancellation from inside the next `confirm` call
    pub fn cancel_on_confirm(&self, handle: CancelHandle) {
        self.state().cancel_on_confirm = Some(handle);
    }

    /// Pretend `id` was broadcast earlier and ended with `outcome`
    pub fn seed_foreign(&self, id: &str, outcome: TransferOutcome) {
        self.state().foreign.insert(id.to_string(), outcome);
    }

    /// Transfers the ledger actually applied, as (recipient owner, raw amount)
    pub fn transfers(&self) -> Vec<(String, u64)> {
        self.state().applied_order.clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state().broadcast.len()
    }

    pub fn sign_calls(&self) -> u32 {
        self.state().sign_calls
    }

    pub fn balance_raw(&self) -> u64 {
        self.state().balance_raw
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn sender(&self) -> String {
        SENDER.to_string()
    }

    async fn resolve_or_create_holding_account(&self, owner: &str, asset: &str) -> AppResult<AccountRef> {
        if self.state().invalid_owners.iter().any(|o| o == owner) {
            return Err(AppError::InvalidAddress(format!("Invalid address: {}", owner)));
        }
        Ok(AccountRef {
            owner: owner.to_string(),
            asset: asset.to_string(),
            address: format!("ata-{}", owner),
        })
    }

    async fn decimal_exponent(&self, _asset: &str) -> AppResult<u32> {
        Ok(self.state().exponent)
    }

    async fn sender_liquidity(&self, _asset: &str) -> AppResult<Decimal> {
        let mut state = self.state();
        if state.liquidity_failures > 0 {
            state.liquidity_failures -= 1;
            return Err(LedgerError::Rpc("balance query timed out".into()).into());
        }
        Ok(Decimal::from_i128_with_scale(
            i128::from(state.balance_raw),
            state.exponent,
        ))
    }

    async fn sign_with_fresh_anchor(&self, instruction: &TransferInstruction) -> AppResult<SignedTransfer> {
        let mut state = self.state();
        state.next_id += 1;
        state.sign_calls += 1;
        let id = format!("tx-{}", state.next_id);
        state.signed.insert(id.clone(), instruction.clone());

        Ok(SignedTransfer {
            id,
            anchor: ValidityAnchor {
                reference: format!("anchor-{}", state.height),
                last_valid_height: state.height + 150,
            },
        })
    }

    async fn submit(&self, signed: &SignedTransfer) -> AppResult<TransactionId> {
        let mut state = self.state();
        match state.submit_script.pop_front() {
            Some(Scripted::RpcFailure) => {
                return Err(LedgerError::Rpc("connection reset".into()).into());
            }
            Some(Scripted::WindowExpired) => {
                state.height += 200;
                return Err(LedgerError::ValidityWindowExpired.into());
            }
            Some(Scripted::Rejected(reason)) => {
                return Err(LedgerError::Rejected(reason.to_string()).into());
            }
            None => {}
        }

        if !state.broadcast.contains(&signed.id) {
            state.broadcast.push(signed.id.clone());
        }
        Ok(signed.id.clone())
    }

    async fn confirm(&self, id: &str, _last_valid_height: u64) -> AppResult<TransferOutcome> {
        let mut state = self.state();

        if let Some(handle) = state.cancel_on_confirm.take() {
            handle.cancel();
        }

        if let Some(outcome) = state.foreign.get(id) {
            return Ok(outcome.clone());
        }

        match state.confirm_script.pop_front() {
            Some(Scripted::RpcFailure) => {
                return Err(LedgerError::Rpc("confirmation poll failed".into()).into());
            }
            Some(Scripted::WindowExpired) => {
                state.height += 200;
                state.broadcast.retain(|b| b != id);
                return Ok(TransferOutcome::Expired);
            }
            Some(Scripted::Rejected(reason)) => {
                state.broadcast.retain(|b| b != id);
                return Ok(TransferOutcome::Rejected(reason.to_string()));
            }
            None => {}
        }

        if !state.broadcast.iter().any(|b| b == id) {
            return Ok(TransferOutcome::Expired);
        }
        if state.applied.contains_key(id) {
            return Ok(TransferOutcome::Confirmed);
        }

        let instruction = match state.signed.get(id) {
            Some(instruction) => instruction.clone(),
            None => return Ok(TransferOutcome::Expired),
        };
        if instruction.raw_amount > state.balance_raw {
            return Ok(TransferOutcome::Rejected("insufficient funds".to_string()));
        }

        state.balance_raw -= instruction.raw_amount;
        let entry = (instruction.destination.owner.clone(), instruction.raw_amount);
        state.applied.insert(id.to_string(), entry.clone());
        state.applied_order.push(entry);
        Ok(TransferOutcome::Confirmed)
    }
}
