//! Loan state machine and the expired-loan sweep
//!
//! Row-level mutual exclusion makes concurrent accepts race-free: the
//! first acceptance transitions the row to `active` while holding its
//! lock, so every later attempt observes the transition and fails with
//! `AlreadyAccepted`.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use ulid::Ulid;

use crate::context::RequestContext;
use crate::coordinator::TransferCoordinator;
use crate::core_types::{Credits, ESCROW_USER, RateScaled, UserId};
use crate::error::LedgerError;
use crate::ledger::TransactionKind;
use crate::notifier::{ChangeFeed, LedgerEvent};
use crate::wallet::{WalletKey, WalletType};

use super::models::{Loan, LoanStatus, LoanTerms};

type LoanRow = Arc<Mutex<Loan>>;

/// Aggregate outcome of one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub repaid_count: u64,
    pub defaulted_count: u64,
    pub total_repaid: Credits,
}

pub struct LoanEngine {
    loans: DashMap<Ulid, LoanRow>,
    coordinator: Arc<TransferCoordinator>,
    feed: Arc<ChangeFeed>,
    processing_fee_rate: RateScaled,
    /// Held for the duration of a sweep; overlapping invocations no-op
    sweep_gate: Mutex<()>,
}

impl LoanEngine {
    pub fn new(
        coordinator: Arc<TransferCoordinator>,
        feed: Arc<ChangeFeed>,
        processing_fee_rate: RateScaled,
    ) -> Self {
        Self {
            loans: DashMap::new(),
            coordinator,
            feed,
            processing_fee_rate,
            sweep_gate: Mutex::new(()),
        }
    }

    /// Post an offer: terms fixed once, principal moved into escrow,
    /// row created in `pending`.
    pub async fn offer(
        &self,
        ctx: &RequestContext,
        principal: Credits,
        interest_rate: RateScaled,
        term_days: u32,
    ) -> Result<Ulid, LedgerError> {
        if principal == 0 {
            return Err(LedgerError::InvalidInput("principal must be positive"));
        }
        if term_days == 0 {
            return Err(LedgerError::InvalidInput("term must be at least one day"));
        }
        let terms = LoanTerms::quote(principal, interest_rate, self.processing_fee_rate)?;

        let id = Ulid::new();
        let escrow_wallet = WalletKey::new(ESCROW_USER, WalletType::Main);
        self.coordinator
            .move_between(
                WalletKey::new(ctx.user_id, WalletType::Main),
                escrow_wallet,
                principal,
                TransactionKind::LoanEscrow,
                "loan principal escrowed",
                Some(id),
            )
            .await?;

        let loan = Loan {
            id,
            lender_id: ctx.user_id,
            borrower_id: None,
            principal_amount: principal,
            interest_rate,
            interest_amount: terms.interest_amount,
            processing_fee: terms.processing_fee,
            total_repayment: terms.total_repayment,
            term_days,
            status: LoanStatus::Pending,
            created_at: Utc::now(),
            accepted_at: None,
            due_at: None,
            repaid_at: None,
            escrow_wallet,
        };
        self.loans.insert(id, Arc::new(Mutex::new(loan)));
        info!(loan_id = %id, lender_id = ctx.user_id, principal, "loan offer posted");
        self.feed.publish(LedgerEvent::LoanOffered {
            loan_id: id,
            lender_id: ctx.user_id,
            principal,
        });
        Ok(id)
    }

    /// Accept an open offer. Exactly one concurrent acceptance succeeds.
    pub async fn accept(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        let row = self.row(id)?;
        let mut loan = row.lock().await;

        match loan.status {
            LoanStatus::Pending if loan.borrower_id.is_none() => {}
            LoanStatus::Cancelled => return Err(LedgerError::AlreadyFinalized),
            _ => return Err(LedgerError::AlreadyAccepted),
        }
        if ctx.user_id == loan.lender_id {
            return Err(LedgerError::InvalidInput("lender cannot accept own offer"));
        }

        self.coordinator
            .move_between(
                loan.escrow_wallet,
                WalletKey::new(ctx.user_id, WalletType::Main),
                loan.principal_amount,
                TransactionKind::LoanDisbursement,
                "loan principal disbursed",
                Some(id),
            )
            .await?;

        let now = Utc::now();
        loan.borrower_id = Some(ctx.user_id);
        loan.accepted_at = Some(now);
        loan.due_at = Some(now + ChronoDuration::days(loan.term_days as i64));
        loan.status = LoanStatus::Active;
        info!(loan_id = %id, borrower_id = ctx.user_id, due_at = %loan.due_at.unwrap_or(now),
              "loan accepted");
        self.feed.publish(LedgerEvent::LoanAccepted {
            loan_id: id,
            borrower_id: ctx.user_id,
        });
        Ok(())
    }

    /// Repay an active loan in full. The borrower (or an admin acting for
    /// the system) triggers it; insufficient funds leave the loan active.
    pub async fn repay(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        let row = self.row(id)?;
        let mut loan = row.lock().await;

        match loan.status {
            LoanStatus::Active => {}
            LoanStatus::Pending => {
                return Err(LedgerError::InvalidInput("loan has not been accepted"));
            }
            _ => return Err(LedgerError::AlreadyFinalized),
        }
        let borrower_id = loan
            .borrower_id
            .ok_or_else(|| LedgerError::Internal("active loan without borrower".to_string()))?;
        if ctx.user_id != borrower_id && !ctx.is_admin {
            return Err(LedgerError::Unauthorized);
        }

        self.settle_repayment(&mut loan, borrower_id, Utc::now()).await?;
        Ok(())
    }

    /// Lender withdraws an unaccepted offer; escrow returns the principal.
    pub async fn cancel(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        let row = self.row(id)?;
        let mut loan = row.lock().await;

        match loan.status {
            LoanStatus::Pending => {}
            LoanStatus::Active => return Err(LedgerError::AlreadyAccepted),
            _ => return Err(LedgerError::AlreadyFinalized),
        }
        if ctx.user_id != loan.lender_id && !ctx.is_admin {
            return Err(LedgerError::Unauthorized);
        }

        self.coordinator
            .move_between(
                loan.escrow_wallet,
                WalletKey::new(loan.lender_id, WalletType::Main),
                loan.principal_amount,
                TransactionKind::LoanEscrowRefund,
                "loan offer cancelled",
                Some(id),
            )
            .await?;

        loan.status = LoanStatus::Cancelled;
        info!(loan_id = %id, lender_id = loan.lender_id, "loan offer cancelled");
        self.feed.publish(LedgerEvent::LoanCancelled {
            loan_id: id,
            lender_id: loan.lender_id,
        });
        Ok(())
    }

    /// Resolve every active loan past its due date: implicit repay on
    /// success, `defaulted` on insufficient funds.
    pub async fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Sweep against an explicit clock (the production task passes
    /// `Utc::now()`; tests pass a future instant).
    ///
    /// Idempotent: loans already terminal are skipped, and a second run
    /// over the same state reports zero additional counts. At most one
    /// sweep is in flight; overlapping invocations return an empty report
    /// without touching any loan.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        let _gate = match self.sweep_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                info!("sweep already in flight, skipping");
                return SweepReport::default();
            }
        };

        let rows: Vec<LoanRow> = self.loans.iter().map(|e| e.value().clone()).collect();
        let mut report = SweepReport::default();

        for row in rows {
            let mut loan = row.lock().await;
            if loan.status != LoanStatus::Active {
                continue;
            }
            let due = match loan.due_at {
                Some(due) if due < now => due,
                _ => continue,
            };
            let borrower_id = match loan.borrower_id {
                Some(borrower_id) => borrower_id,
                None => {
                    warn!(loan_id = %loan.id, "active loan without borrower, skipping");
                    continue;
                }
            };

            match self.settle_repayment(&mut loan, borrower_id, now).await {
                Ok(()) => {
                    report.repaid_count += 1;
                    report.total_repaid += loan.total_repayment;
                }
                Err(LedgerError::InsufficientBalance) => {
                    loan.status = LoanStatus::Defaulted;
                    report.defaulted_count += 1;
                    info!(loan_id = %loan.id, borrower_id, %due, "loan defaulted");
                    self.feed.publish(LedgerEvent::LoanDefaulted {
                        loan_id: loan.id,
                        borrower_id,
                        lender_id: loan.lender_id,
                    });
                }
                Err(e) => {
                    // Transient (e.g. lock contention): leave active, the
                    // next sweep retries this loan independently.
                    warn!(loan_id = %loan.id, error = %e, "sweep repay attempt failed");
                }
            }
        }

        if report.repaid_count > 0 || report.defaulted_count > 0 {
            info!(
                repaid = report.repaid_count,
                defaulted = report.defaulted_count,
                total_repaid = report.total_repaid,
                "sweep completed"
            );
        }
        report
    }

    /// Snapshot of one loan row
    pub async fn get(&self, id: Ulid) -> Result<Loan, LedgerError> {
        let row = self.row(id)?;
        let loan = row.lock().await;
        Ok(loan.clone())
    }

    /// Open offers a borrower could accept (poll interface)
    pub async fn open_offers(&self) -> Vec<Loan> {
        let rows: Vec<LoanRow> = self.loans.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for row in rows {
            let loan = row.lock().await;
            if loan.status == LoanStatus::Pending {
                out.push(loan.clone());
            }
        }
        out.sort_by_key(|l| l.created_at);
        out
    }

    /// Does this member currently owe on an active loan?
    pub async fn has_active_borrowing(&self, user_id: UserId) -> bool {
        let rows: Vec<LoanRow> = self.loans.iter().map(|e| e.value().clone()).collect();
        for row in rows {
            let loan = row.lock().await;
            if loan.status == LoanStatus::Active && loan.borrower_id == Some(user_id) {
                return true;
            }
        }
        false
    }

    /// Count of loans in a given status (admin dashboard aggregate)
    pub async fn count_by_status(&self, status: LoanStatus) -> usize {
        let rows: Vec<LoanRow> = self.loans.iter().map(|e| e.value().clone()).collect();
        let mut count = 0;
        for row in rows {
            if row.lock().await.status == status {
                count += 1;
            }
        }
        count
    }

    fn row(&self, id: Ulid) -> Result<LoanRow, LedgerError> {
        self.loans
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(LedgerError::NotFound("loan"))
    }

    /// Move `total_repayment` borrower -> lender and mark the row repaid.
    /// The status only moves after the transfer fully resolves.
    async fn settle_repayment(
        &self,
        loan: &mut Loan,
        borrower_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.coordinator
            .move_between(
                WalletKey::new(borrower_id, WalletType::Main),
                WalletKey::new(loan.lender_id, WalletType::Main),
                loan.total_repayment,
                TransactionKind::LoanRepayment,
                "loan repaid",
                Some(loan.id),
            )
            .await?;

        loan.status = LoanStatus::Repaid;
        loan.repaid_at = Some(now);
        info!(loan_id = %loan.id, borrower_id, amount = loan.total_repayment, "loan repaid");
        self.feed.publish(LedgerEvent::LoanRepaid {
            loan_id: loan.id,
            borrower_id,
            lender_id: loan.lender_id,
            amount: loan.total_repayment,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerBook;
    use crate::store::WalletStore;
    use crate::wallet::WalletType;
    use std::time::Duration;

    struct Fixture {
        store: Arc<WalletStore>,
        engine: Arc<LoanEngine>,
    }

    fn fixture(fee_rate: RateScaled) -> Fixture {
        let store = Arc::new(WalletStore::new());
        let ledger = Arc::new(LedgerBook::new());
        let feed = Arc::new(ChangeFeed::new(16));
        let coordinator = Arc::new(TransferCoordinator::new(
            store.clone(),
            ledger,
            feed.clone(),
            Duration::from_millis(250),
        ));
        let engine = Arc::new(LoanEngine::new(coordinator, feed, fee_rate));
        Fixture { store, engine }
    }

    async fn seed_main(store: &WalletStore, user_id: UserId, units: Credits) {
        store
            .row(WalletKey::new(user_id, WalletType::Main))
            .lock()
            .await
            .credit(units)
            .unwrap();
    }

    const LENDER: UserId = 10;
    const BORROWER: UserId = 20;

    #[tokio::test]
    async fn test_offer_escrows_principal() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_500).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();

        assert_eq!(fx.store.balances(LENDER).await.main, 500);
        assert_eq!(fx.store.balances(ESCROW_USER).await.main, 1_000);

        let loan = fx.engine.get(id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.interest_amount, 30);
        assert_eq!(loan.total_repayment, 1_030);
        assert!(loan.borrower_id.is_none());
    }

    #[tokio::test]
    async fn test_offer_without_funds_fails() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 100).await;

        assert_eq!(
            fx.engine
                .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
                .await,
            Err(LedgerError::InsufficientBalance)
        );
        assert_eq!(fx.store.balances(LENDER).await.main, 100);
    }

    #[tokio::test]
    async fn test_accept_disburses_and_sets_due_date() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();

        assert_eq!(fx.store.balances(BORROWER).await.main, 1_000);
        assert_eq!(fx.store.balances(ESCROW_USER).await.main, 0);

        let loan = fx.engine.get(id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.borrower_id, Some(BORROWER));
        let accepted_at = loan.accepted_at.unwrap();
        assert_eq!(loan.due_at.unwrap(), accepted_at + ChronoDuration::days(7));
    }

    #[tokio::test]
    async fn test_concurrent_accept_exactly_one_wins() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 0, 7)
            .await
            .unwrap();

        let a = fx.engine.clone();
        let b = fx.engine.clone();
        let ctx_a = RequestContext::member(20);
        let ctx_b = RequestContext::member(21);
        let (ra, rb) = tokio::join!(a.accept(&ctx_a, id), b.accept(&ctx_b, id),);

        let ra_ok = ra.is_ok();
        assert!(ra_ok ^ rb.is_ok(), "exactly one accept must win");
        let loser = if ra_ok { rb } else { ra };
        assert_eq!(loser, Err(LedgerError::AlreadyAccepted));

        // Principal disbursed exactly once
        let winner = if ra_ok { 20 } else { 21 };
        assert_eq!(fx.store.balances(winner).await.main, 1_000);
        assert_eq!(fx.store.balances(ESCROW_USER).await.main, 0);
    }

    #[tokio::test]
    async fn test_lender_cannot_accept_own_offer() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;
        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 0, 7)
            .await
            .unwrap();

        assert!(matches!(
            fx.engine.accept(&RequestContext::member(LENDER), id).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_repay_full_lifecycle() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;
        seed_main(&fx.store, BORROWER, 100).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();

        fx.engine
            .repay(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();

        // Borrower had 100 + 1000 principal, paid 1030 back
        assert_eq!(fx.store.balances(BORROWER).await.main, 70);
        assert_eq!(fx.store.balances(LENDER).await.main, 1_030);

        let loan = fx.engine.get(id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Repaid);
        assert!(loan.repaid_at.is_some());

        // Repaying again is an idempotency error, no double charge
        assert_eq!(
            fx.engine.repay(&RequestContext::member(BORROWER), id).await,
            Err(LedgerError::AlreadyFinalized)
        );
        assert_eq!(fx.store.balances(LENDER).await.main, 1_030);
    }

    #[tokio::test]
    async fn test_repay_insufficient_leaves_active() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();

        // Borrower burns the principal elsewhere
        fx.store
            .row(WalletKey::new(BORROWER, WalletType::Main))
            .lock()
            .await
            .debit(1_000)
            .unwrap();

        assert_eq!(
            fx.engine.repay(&RequestContext::member(BORROWER), id).await,
            Err(LedgerError::InsufficientBalance)
        );
        assert_eq!(
            fx.engine.get(id).await.unwrap().status,
            LoanStatus::Active
        );
    }

    #[tokio::test]
    async fn test_only_borrower_or_admin_repays() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;
        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 0, 7)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();

        assert_eq!(
            fx.engine.repay(&RequestContext::member(55), id).await,
            Err(LedgerError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_cancel_restores_lender_exactly() {
        let fx = fixture(10_000);
        seed_main(&fx.store, LENDER, 1_234).await;

        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        assert_eq!(fx.store.balances(LENDER).await.main, 234);

        fx.engine
            .cancel(&RequestContext::member(LENDER), id)
            .await
            .unwrap();

        // Pre-offer balance restored exactly
        assert_eq!(fx.store.balances(LENDER).await.main, 1_234);
        assert_eq!(fx.store.balances(ESCROW_USER).await.main, 0);
        assert_eq!(
            fx.engine.get(id).await.unwrap().status,
            LoanStatus::Cancelled
        );

        // Cancelled offer cannot be accepted
        assert_eq!(
            fx.engine.accept(&RequestContext::member(BORROWER), id).await,
            Err(LedgerError::AlreadyFinalized)
        );
    }

    #[tokio::test]
    async fn test_cancel_requires_lender() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;
        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 0, 7)
            .await
            .unwrap();

        assert_eq!(
            fx.engine.cancel(&RequestContext::member(BORROWER), id).await,
            Err(LedgerError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_sweep_repays_or_defaults_and_is_idempotent() {
        let fx = fixture(0);
        // Lender funds two loans
        seed_main(&fx.store, LENDER, 2_000).await;
        // Borrower 20 will be able to cover repayment, borrower 21 will not
        seed_main(&fx.store, 20, 100).await;

        let solvent = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        let insolvent = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 30_000, 7)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(20), solvent)
            .await
            .unwrap();
        fx.engine
            .accept(&RequestContext::member(21), insolvent)
            .await
            .unwrap();
        // Borrower 21 spends the principal
        fx.store
            .row(WalletKey::new(21, WalletType::Main))
            .lock()
            .await
            .debit(950)
            .unwrap();

        // Nothing due yet: sweep is a no-op
        let report = fx.engine.sweep_expired().await;
        assert_eq!(report, SweepReport::default());

        // Past the due date: one repaid, one defaulted
        let later = Utc::now() + ChronoDuration::days(8);
        let report = fx.engine.sweep_expired_at(later).await;
        assert_eq!(report.repaid_count, 1);
        assert_eq!(report.defaulted_count, 1);
        assert_eq!(report.total_repaid, 1_030);

        assert_eq!(
            fx.engine.get(solvent).await.unwrap().status,
            LoanStatus::Repaid
        );
        assert_eq!(
            fx.engine.get(insolvent).await.unwrap().status,
            LoanStatus::Defaulted
        );
        // The defaulted principal stays a recorded loss; no silent recovery
        assert_eq!(fx.store.balances(LENDER).await.main, 1_030);

        // Second run: same statuses, zero additional counts
        let report = fx.engine.sweep_expired_at(later).await;
        assert_eq!(report, SweepReport::default());
        assert_eq!(fx.store.balances(LENDER).await.main, 1_030);
    }

    #[tokio::test]
    async fn test_has_active_borrowing() {
        let fx = fixture(0);
        seed_main(&fx.store, LENDER, 1_000).await;
        let id = fx
            .engine
            .offer(&RequestContext::member(LENDER), 1_000, 0, 7)
            .await
            .unwrap();

        assert!(!fx.engine.has_active_borrowing(BORROWER).await);
        fx.engine
            .accept(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();
        assert!(fx.engine.has_active_borrowing(BORROWER).await);

        fx.engine
            .repay(&RequestContext::member(BORROWER), id)
            .await
            .unwrap();
        assert!(!fx.engine.has_active_borrowing(BORROWER).await);
    }

    #[tokio::test]
    async fn test_offer_validation() {
        let fx = fixture(0);
        let lender = RequestContext::member(LENDER);
        assert!(matches!(
            fx.engine.offer(&lender, 0, 30_000, 7).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.engine.offer(&lender, 1_000, 30_000, 0).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
