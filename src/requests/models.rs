//! Cash request data model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::core_types::{Credits, UserId};

/// Which way value moves relative to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashDirection {
    /// External rail -> member's main wallet
    CashIn,
    /// Member's main wallet -> external rail
    CashOut,
}

impl fmt::Display for CashDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CashDirection::CashIn => write!(f, "cash_in"),
            CashDirection::CashOut => write!(f, "cash_out"),
        }
    }
}

/// Request review states
///
/// `Approved` and `Rejected` are terminal; `OnHold`, `Flagged` and
/// `Processing` are re-enterable intermediate holds used during manual
/// fraud review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    OnHold,
    Flagged,
    Processing,
}

impl RequestStatus {
    /// Terminal rows (and their balance effects) are immutable
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Approved | RequestStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::OnHold => "on_hold",
            RequestStatus::Flagged => "flagged",
            RequestStatus::Processing => "processing",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters for creating a request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCashRequest {
    pub direction: CashDirection,
    pub amount: Credits,
    pub payment_method: String,
    /// Opaque reference into proof/document storage; never inspected
    pub proof_ref: Option<String>,
    /// Whether the member passed the pin challenge for this request
    #[serde(default)]
    pub pin_verified: bool,
}

/// One cash-in/cash-out request row
#[derive(Debug, Clone, Serialize)]
pub struct CashRequest {
    pub id: Ulid,
    pub user_id: UserId,
    pub direction: CashDirection,
    pub amount: Credits,
    /// Fee fixed at creation from the configured rate (cash-out only)
    pub fee_amount: Credits,
    /// Externally-paid figure: amount - fee_amount
    pub net_amount: Credits,
    pub payment_method: String,
    pub proof_ref: Option<String>,
    pub pin_verified: bool,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
