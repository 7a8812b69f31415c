//! Ledger error taxonomy
//!
//! One error type for every ledger operation, with stable string codes
//! for API responses.

use thiserror::Error;

use crate::balance::BalanceError;

/// Ledger operation errors
///
/// Codes and HTTP mappings are stable; handlers translate them into the
/// unified API envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Validation (rejected before any lock is taken) ===
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    // === Mutation-time checks (under the wallet lock, no TOCTOU gap) ===
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("balance arithmetic overflow")]
    Overflow,

    // === Lookup ===
    #[error("not found: {0}")]
    NotFound(&'static str),

    // === Contention (retryable) ===
    #[error("wallet lock not acquired within the bounded wait")]
    Conflict,

    // === Idempotency guards ===
    #[error("request already finalized")]
    AlreadyFinalized,

    #[error("loan already accepted")]
    AlreadyAccepted,

    // === Capability ===
    #[error("caller lacks rights for this operation")]
    Unauthorized,

    // === Client-layer pacing ===
    #[error("transfer attempted inside the debounce window")]
    TooFast,

    // === System ===
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::Overflow => "OVERFLOW",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Conflict => "CONFLICT",
            LedgerError::AlreadyFinalized => "ALREADY_FINALIZED",
            LedgerError::AlreadyAccepted => "ALREADY_ACCEPTED",
            LedgerError::Unauthorized => "UNAUTHORIZED",
            LedgerError::TooFast => "TOO_FAST",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidInput(_) | LedgerError::Overflow => 400,
            LedgerError::Unauthorized => 403,
            LedgerError::NotFound(_) => 404,
            LedgerError::InsufficientBalance => 422,
            LedgerError::Conflict
            | LedgerError::AlreadyFinalized
            | LedgerError::AlreadyAccepted => 409,
            LedgerError::TooFast => 429,
            LedgerError::Internal(_) => 500,
        }
    }

    /// Whether the caller may safely retry the identical call
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict | LedgerError::TooFast)
    }
}

impl From<BalanceError> for LedgerError {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::Insufficient => LedgerError::InsufficientBalance,
            BalanceError::Overflow => LedgerError::Overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InsufficientBalance.code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(LedgerError::Conflict.code(), "CONFLICT");
        assert_eq!(LedgerError::AlreadyAccepted.code(), "ALREADY_ACCEPTED");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidInput("bad amount").http_status(), 400);
        assert_eq!(LedgerError::Unauthorized.http_status(), 403);
        assert_eq!(LedgerError::InsufficientBalance.http_status(), 422);
        assert_eq!(LedgerError::AlreadyFinalized.http_status(), 409);
        assert_eq!(LedgerError::TooFast.http_status(), 429);
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::Conflict.is_retryable());
        assert!(!LedgerError::AlreadyFinalized.is_retryable());
    }

    #[test]
    fn test_balance_error_mapping() {
        assert_eq!(
            LedgerError::from(BalanceError::Insufficient),
            LedgerError::InsufficientBalance
        );
        assert_eq!(LedgerError::from(BalanceError::Overflow), LedgerError::Overflow);
    }
}
