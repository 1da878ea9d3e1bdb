//! Ledger error taxonomy and its HTTP mapping.
//!
//! Every failure carries a machine-readable kind plus a human-readable
//! message; no error is ever folded into a success response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Failures the ledger and its stores can produce.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits to cover the operation")]
    InsufficientFunds,

    #[error("url must reference {0}")]
    InvalidTarget(String),

    #[error("malformed request: {0}")]
    InvalidInput(String),

    #[error("task not found")]
    TaskNotFound,

    #[error("no actions remaining for this task")]
    TaskExhausted,

    #[error("already completed by this user")]
    AlreadyCompleted,

    #[error("completion already verified")]
    AlreadyVerified,

    #[error("account not found")]
    AccountNotFound,

    #[error("completion not found")]
    CompletionNotFound,

    /// A mutation sequence failed after a partial write and the
    /// compensating action failed too; the caller must reconcile.
    #[error("partial failure: {0}")]
    PartialFailure(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LedgerError {
    /// Stable machine-readable discriminant for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds => "insufficient_funds",
            LedgerError::InvalidTarget(_) => "invalid_target",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::TaskNotFound => "task_not_found",
            LedgerError::TaskExhausted => "task_exhausted",
            LedgerError::AlreadyCompleted => "already_completed",
            LedgerError::AlreadyVerified => "already_verified",
            LedgerError::AccountNotFound => "account_not_found",
            LedgerError::CompletionNotFound => "completion_not_found",
            LedgerError::PartialFailure(_) => "partial_failure",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LedgerError::InsufficientFunds
            | LedgerError::InvalidTarget(_)
            | LedgerError::InvalidInput(_)
            | LedgerError::TaskExhausted
            | LedgerError::AlreadyVerified => StatusCode::BAD_REQUEST,
            LedgerError::TaskNotFound
            | LedgerError::AccountNotFound
            | LedgerError::CompletionNotFound => StatusCode::NOT_FOUND,
            LedgerError::AlreadyCompleted => StatusCode::CONFLICT,
            LedgerError::PartialFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::StoreUnavailable(e.to_string())
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "ledger operation failed: {}", self);
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
