//! Loan data model and term math

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::core_types::{Credits, RateScaled, UserId};
use crate::error::LedgerError;
use crate::fees::scale_by_rate;
use crate::wallet::WalletKey;

/// Loan lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Offer posted, principal escrowed, no borrower yet
    Pending,
    /// Accepted; principal disbursed, repayment due at `due_at`
    Active,
    /// Terminal: repaid in full
    Repaid,
    /// Terminal: due date passed without cleared repayment
    Defaulted,
    /// Terminal: lender withdrew the unaccepted offer
    Cancelled,
}

impl LoanStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Repaid | LoanStatus::Defaulted | LoanStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Active => "active",
            LoanStatus::Repaid => "repaid",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Figures computed exactly once at offer creation and never recomputed.
///
/// Canonical fee order: interest accrues on the principal first, the
/// processing fee comes off last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanTerms {
    pub interest_amount: Credits,
    pub processing_fee: Credits,
    pub total_repayment: Credits,
}

impl LoanTerms {
    pub fn quote(
        principal: Credits,
        interest_rate: RateScaled,
        fee_rate: RateScaled,
    ) -> Result<Self, LedgerError> {
        let interest_amount = scale_by_rate(principal, interest_rate);
        let processing_fee = scale_by_rate(principal, fee_rate);
        let total_repayment = principal
            .checked_add(interest_amount)
            .and_then(|gross| gross.checked_sub(processing_fee))
            .filter(|total| *total > 0)
            .ok_or(LedgerError::InvalidInput(
                "loan terms do not yield a positive repayment",
            ))?;
        Ok(Self {
            interest_amount,
            processing_fee,
            total_repayment,
        })
    }
}

/// One loan row
#[derive(Debug, Clone, Serialize)]
pub struct Loan {
    pub id: Ulid,
    pub lender_id: UserId,
    /// Set exactly once, at acceptance
    pub borrower_id: Option<UserId>,
    pub principal_amount: Credits,
    pub interest_rate: RateScaled,
    pub interest_amount: Credits,
    pub processing_fee: Credits,
    pub total_repayment: Credits,
    pub term_days: u32,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub repaid_at: Option<DateTime<Utc>>,
    /// The escrow wallet that custodied the principal
    pub escrow_wallet: WalletKey,
}
