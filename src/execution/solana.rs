use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::CommitmentConfig};
use solana_sdk::{
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, TransactionError},
};
use std::{
    collections::HashMap, str::FromStr, sync::Arc, time::Duration
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult, LedgerError},
    execution::client::*,
};


#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Blocks past the anchor's last valid height before a missing transaction counts as expired
    pub expiry_grace_blocks: u64,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: CommitmentConfig::confirmed(),
            confirmation_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            expiry_grace_blocks: 5,
        }
    }
}

/// SPL token ledger client
pub struct SolanaLedgerClient {
    config: SolanaConfig,
    client: RpcClient,
    sender_keypair: Arc<Keypair>,
    /// Signed transactions awaiting broadcast or confirmation, by signature
    signed: Mutex<HashMap<String, Transaction>>,
}

impl SolanaLedgerClient {
    pub fn new(config: SolanaConfig, sender_keypair: Keypair) -> Self {
        let client = RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment);

        Self {
            config,
            client,
            sender_keypair: Arc::new(sender_keypair),
            signed: Mutex::new(HashMap::new()),
        }
    }

    fn parse_pubkey(value: &str) -> AppResult<Pubkey> {
        Pubkey::from_str(value.trim())
            .map_err(|_| AppError::InvalidAddress(format!("Invalid Solana address: {}", value)))
    }

    fn rpc_error(context: &str, error: impl std::fmt::Display) -> AppError {
        LedgerError::Rpc(format!("{}: {}", context, error)).into()
    }

    async fn send_and_confirm(&self, instructions: &[Instruction]) -> AppResult<Signature> {
        let recent_blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| Self::rpc_error("Failed to get blockhash", e))?;

        let payer = self.sender_keypair.pubkey();
        let message = Message::new(instructions, Some(&payer));
        let transaction = Transaction::new(&[&*self.sender_keypair], message, recent_blockhash);

        self.client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| Self::rpc_error("Send failed", e))
    }
}

/// Parse a sender secret key: a JSON byte array (solana-keygen file format) or a base58 string
pub fn parse_keypair(secret: &str) -> AppResult<Keypair> {
    let secret = secret.trim();

    if secret.starts_with('[') {
        let bytes: Vec<u8> = serde_json::from_str(secret)
            .map_err(|e| AppError::Config(format!("Invalid key byte array: {}", e)))?;
        return Keypair::try_from(bytes.as_slice())
            .map_err(|e| AppError::Config(format!("Invalid keypair bytes: {}", e)));
    }

    Keypair::try_from_base58_string(secret)
        .map_err(|e| AppError::Config(format!("Invalid base58 private key: {}", e)))
}

/// What the ledger knows about a signature
#[derive(Debug, Clone, PartialEq, Eq)]
enum SignatureState {
    Failed(String),
    /// Executed and at the configured commitment
    Landed,
    /// Seen, not yet at the configured commitment
    Processing,
    Unknown,
}

/// Outcome for a signature lookup, `None` while it can still land.
///
/// `Unknown` only means expired once the block height is past the anchor's
/// expiry and the history lookup came back empty too.
fn decide_outcome(state: SignatureState, block_height: u64, expiry_height: u64) -> Option<TransferOutcome> {
    match state {
        SignatureState::Failed(reason) => Some(TransferOutcome::Rejected(reason)),
        SignatureState::Landed => Some(TransferOutcome::Confirmed),
        SignatureState::Processing => None,
        SignatureState::Unknown if block_height > expiry_height => Some(TransferOutcome::Expired),
        SignatureState::Unknown => None,
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    fn sender(&self) -> String {
        self.sender_keypair.pubkey().to_string()
    }

    async fn resolve_or_create_holding_account(&self, owner: &str, asset: &str) -> AppResult<AccountRef> {
        let owner_pubkey = Self::parse_pubkey(owner)?;
        let mint = Self::parse_pubkey(asset)?;
        let ata = spl_associated_token_account::get_associated_token_address(&owner_pubkey, &mint);

        let existing = self
            .client
            .get_account_with_commitment(&ata, self.config.commitment)
            .await
            .map_err(|e| Self::rpc_error("Failed to query token account", e))?
            .value;

        match existing {
            Some(account) if account.owner != spl_token::id() => {
                return Err(LedgerError::AccountUnavailable(format!(
                    "{} is owned by {} instead of the token program",
                    ata, account.owner
                ))
                .into());
            }
            Some(_) => {}
            None => {
                info!("Creating associated token account {} for {}", ata, owner_pubkey);

                let create = spl_associated_token_account::instruction::create_associated_token_account_idempotent(
                    &self.sender_keypair.pubkey(),
                    &owner_pubkey,
                    &mint,
                    &spl_token::id(),
                );
                let signature = self.send_and_confirm(&[create]).await?;

                info!("✅ Token account {} created (tx: {})", ata, signature);
            }
        }

        Ok(AccountRef {
            owner: owner_pubkey.to_string(),
            asset: mint.to_string(),
            address: ata.to_string(),
        })
    }

    async fn decimal_exponent(&self, asset: &str) -> AppResult<u32> {
        let mint = Self::parse_pubkey(asset)?;

        let supply = self
            .client
            .get_token_supply(&mint)
            .await
            .map_err(|e| Self::rpc_error("Failed to get mint info", e))?;

        Ok(u32::from(supply.decimals))
    }

    async fn sender_liquidity(&self, asset: &str) -> AppResult<Decimal> {
        let mint = Self::parse_pubkey(asset)?;
        let ata = spl_associated_token_account::get_associated_token_address(
            &self.sender_keypair.pubkey(),
            &mint,
        );

        let balance = self
            .client
            .get_token_account_balance(&ata)
            .await
            .map_err(|e| Self::rpc_error("Failed to get sender balance", e))?;

        Ok(Decimal::from_str(&balance.ui_amount_string)?)
    }

    async fn sign_with_fresh_anchor(&self, instruction: &TransferInstruction) -> AppResult<SignedTransfer> {
        let source = Self::parse_pubkey(&instruction.source.address)?;
        let destination = Self::parse_pubkey(&instruction.destination.address)?;
        let authority = self.sender_keypair.pubkey();

        let transfer = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &authority,
            &[],
            instruction.raw_amount,
        )
        .map_err(|e| AppError::Internal(format!("Failed to build SPL transfer instruction: {:?}", e)))?;

        let (blockhash, last_valid_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.config.commitment)
            .await
            .map_err(|e| Self::rpc_error("Failed to get blockhash", e))?;

        let message = Message::new(&[transfer], Some(&authority));
        let mut transaction = Transaction::new_unsigned(message);
        transaction.sign(&[&*self.sender_keypair], blockhash);

        let id = transaction.signatures[0].to_string();
        debug!(
            "Signed transfer {} anchored at {} (valid until height {})",
            id, blockhash, last_valid_height
        );

        self.signed.lock().await.insert(id.clone(), transaction);

        Ok(SignedTransfer {
            id,
            anchor: ValidityAnchor {
                reference: blockhash.to_string(),
                last_valid_height,
            },
        })
    }

    async fn submit(&self, signed: &SignedTransfer) -> AppResult<TransactionId> {
        let transaction = self
            .signed
            .lock()
            .await
            .get(&signed.id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("No signed transaction {}", signed.id)))?;

        match self.client.send_transaction(&transaction).await {
            Ok(signature) => {
                info!("📤 Transaction sent: {}", signature);
                Ok(signature.to_string())
            }
            Err(e) => match e.get_transaction_error() {
                Some(TransactionError::BlockhashNotFound) => {
                    self.signed.lock().await.remove(&signed.id);
                    Err(LedgerError::ValidityWindowExpired.into())
                }
                Some(TransactionError::AlreadyProcessed) => {
                    warn!("Transaction {} was already processed", signed.id);
                    Ok(signed.id.clone())
                }
                Some(err) => {
                    self.signed.lock().await.remove(&signed.id);
                    Err(LedgerError::Rejected(format!("{:?}", err)).into())
                }
                None => Err(Self::rpc_error("Failed to send transaction", e)),
            },
        }
    }

    async fn confirm(&self, id: &str, last_valid_height: u64) -> AppResult<TransferOutcome> {
        let signature = Signature::from_str(id)
            .map_err(|_| AppError::InvalidInput(format!("Invalid transaction signature: {}", id)))?;

        let start = std::time::Instant::now();
        let expiry_height = last_valid_height.saturating_add(self.config.expiry_grace_blocks);

        let outcome = loop {
            let (state, block_height) = match self.signature_state(&signature, false).await? {
                SignatureState::Unknown => {
                    let height = self
                        .client
                        .get_block_height()
                        .await
                        .map_err(|e| Self::rpc_error("Failed to get block height", e))?;

                    // The status cache only covers recent blocks; an old transfer
                    // is only found in the ledger history
                    if height > expiry_height {
                        debug!("Signature {} not in status cache, searching history", id);
                        (self.signature_state(&signature, true).await?, height)
                    } else {
                        (SignatureState::Unknown, height)
                    }
                }
                state => (state, 0),
            };

            if let Some(outcome) = decide_outcome(state, block_height, expiry_height) {
                break outcome;
            }

            if start.elapsed() > self.config.confirmation_timeout {
                return Err(LedgerError::Rpc(format!("Confirmation of {} timed out", id)).into());
            }

            tokio::time::sleep(self.config.poll_interval).await;
        };

        self.signed.lock().await.remove(id);
        Ok(outcome)
    }
}

impl SolanaLedgerClient {
    async fn signature_state(&self, signature: &Signature, search_history: bool) -> AppResult<SignatureState> {
        let statuses = if search_history {
            self.client.get_signature_statuses_with_history(&[*signature]).await
        } else {
            self.client.get_signature_statuses(&[*signature]).await
        }
        .map_err(|e| Self::rpc_error("Failed to get signature status", e))?;

        Ok(match statuses.value.into_iter().next().flatten() {
            Some(status) => match status.err {
                Some(err) => SignatureState::Failed(format!("{:?}", err)),
                None if status.satisfies_commitment(self.config.commitment) => SignatureState::Landed,
                None => SignatureState::Processing,
            },
            None => SignatureState::Unknown,
        })
    }
}
