use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::migrate::MigrateError;
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Failures reported by the ledger capability surface
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The anchor the transaction cites is no longer accepted. Rebuild with a fresh one.
    #[error("Validity window expired before the transaction was accepted")]
    ValidityWindowExpired,

    #[error("Ledger RPC failure: {0}")]
    Rpc(String),

    #[error("Transaction rejected by the ledger: {0}")]
    Rejected(String),

    #[error("Holding account unavailable: {0}")]
    AccountUnavailable(String),
}

/// Distribution run errors
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: u64, available: u64 },

    #[error("Invalid payout record {id}: {reason}")]
    InvalidRecord { id: i64, reason: String },

    #[error("Payout store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("A distribution run is already in progress")]
    RunInProgress,
}

impl AppError {
    /// Whether retrying the same operation unchanged may succeed.
    ///
    /// Only I/O level failures qualify. An expired validity window is not
    /// transient: the payload has to be rebuilt with a fresh anchor.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Ledger(LedgerError::Rpc(_)) => true,
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            AppError::Distribution(DistributionError::StoreUnavailable(_)) => true,
            _ => false,
        }
    }

    /// Errors that disqualify a single record but leave the run healthy
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            AppError::InvalidAddress(_)
                | AppError::Ledger(LedgerError::AccountUnavailable(_))
                | AppError::Distribution(DistributionError::InvalidRecord { .. })
        )
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Distribution(DistributionError::RunInProgress) => (
                StatusCode::CONFLICT,
                "RUN_IN_PROGRESS",
                self.to_string(),
            ),
            AppError::Distribution(DistributionError::StoreUnavailable(_)) | AppError::Database(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The payout store is unavailable".to_string(),
            ),
            AppError::Ledger(_) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_ERROR",
                self.to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::InvalidInput(_) | AppError::InvalidAddress(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                self.to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
