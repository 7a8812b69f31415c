//! Ledger book - append-only settlement audit log
//!
//! Every committed wallet delta is recorded as exactly one entry; entries
//! are never updated or deleted. Per-wallet entry order matches the order
//! the balances were actually applied, because entries are appended while
//! the wallet lock is still held.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::core_types::{Credits, SignedCredits, UserId};
use crate::wallet::WalletType;

/// What kind of settlement produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    InternalMove,
    CashIn,
    CashOut,
    LoanEscrow,
    LoanDisbursement,
    LoanRepayment,
    LoanEscrowRefund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::InternalMove => "internal_move",
            TransactionKind::CashIn => "cash_in",
            TransactionKind::CashOut => "cash_out",
            TransactionKind::LoanEscrow => "loan_escrow",
            TransactionKind::LoanDisbursement => "loan_disbursement",
            TransactionKind::LoanRepayment => "loan_repayment",
            TransactionKind::LoanEscrowRefund => "loan_escrow_refund",
        }
    }
}

/// Immutable audit record of one balance delta
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: Ulid,
    pub user_id: UserId,
    pub wallet_type: WalletType,
    /// Signed delta: negative = debit
    pub amount: SignedCredits,
    pub kind: TransactionKind,
    pub description: String,
    /// The request/loan that caused this delta, if any
    pub reference_id: Option<Ulid>,
    /// Wallet balance after this delta was applied
    pub balance_after: Credits,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: UserId,
        wallet_type: WalletType,
        amount: SignedCredits,
        kind: TransactionKind,
        description: impl Into<String>,
        reference_id: Option<Ulid>,
        balance_after: Credits,
    ) -> Self {
        Self {
            id: Ulid::new(),
            user_id,
            wallet_type,
            amount,
            kind,
            description: description.into(),
            reference_id,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

/// Append-only book of ledger entries
///
/// Appends happen inside the coordinator's wallet-lock scope, so the
/// book's per-wallet order is the commit order an auditor expects.
#[derive(Default)]
pub struct LedgerBook {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry, returning its id
    pub fn append(&self, entry: LedgerEntry) -> Ulid {
        let id = entry.id;
        self.entries.lock().expect("ledger book poisoned").push(entry);
        id
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger book poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries for one member, oldest first
    pub fn entries_for(&self, user_id: UserId) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .expect("ledger book poisoned")
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Net signed sum of all entries with the given kind
    pub fn net_for_kind(&self, kind: TransactionKind) -> SignedCredits {
        self.entries
            .lock()
            .expect("ledger book poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.amount)
            .sum()
    }

    /// Dump the whole book as CSV for offline audit
    ///
    /// Returns the number of entries written.
    pub fn export_csv(&self, path: &Path) -> io::Result<u64> {
        let mut file = File::create(path)?;
        writeln!(
            file,
            "id,user_id,wallet_type,amount,kind,reference_id,balance_after,created_at"
        )?;

        let entries = self.entries.lock().expect("ledger book poisoned");
        for entry in entries.iter() {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{}",
                entry.id,
                entry.user_id,
                entry.wallet_type,
                entry.amount,
                entry.kind.as_str(),
                entry
                    .reference_id
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
                entry.balance_after,
                entry.created_at.to_rfc3339(),
            )?;
        }
        Ok(entries.len() as u64)
    }
}
