use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Batch aggregation and integrity errors
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("mixed currencies in aggregation input: {first} vs {other}")]
    MixedCurrency { first: String, other: String },

    #[error("payee shares must sum to 10000 basis points, got {0}")]
    InvalidShares(u32),

    #[error("at least one payee must be configured")]
    NoPayees,

    #[error("payee count {payees} does not match share count {shares}")]
    SplitMismatch { payees: usize, shares: usize },

    #[error("token decimals must be at least 2 for an exact minor-unit conversion, got {0}")]
    UnsupportedDecimals(u32),

    #[error("invalid payee address: {0}")]
    InvalidPayee(String),

    #[error("batch {batch_id} failed integrity check: {reason}")]
    IntegrityViolation { batch_id: String, reason: String },

    #[error("payments were consumed by a concurrent batch")]
    PaymentsConflict,
}

/// Ledger (chain) client errors - all retryable from the executor's
/// point of view; they never advance batch state.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid transaction id: {0}")]
    InvalidTxId(String),

    #[error("invalid signer key: {0}")]
    InvalidKey(String),
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
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid or missing signature".to_string(),
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                format!("Invalid input: {}", msg),
            ),
            AppError::Batch(BatchError::MixedCurrency { first, other }) => (
                StatusCode::BAD_REQUEST,
                "MIXED_CURRENCY",
                format!("Mixed currencies: {} vs {}", first, other),
            ),
            AppError::Batch(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "BATCH_ERROR",
                err.to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
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

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
