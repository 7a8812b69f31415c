//! Transfer Coordinator
//!
//! Serializes one logical transfer into an all-or-nothing balance
//! mutation against the Wallet Store. This is the ONLY component that
//! writes wallet balances; the request and loan engines call it rather
//! than touching wallets themselves, so all concurrency control lives in
//! one place.
//!
//! # Protocol
//!
//! 1. Validate parameters before any lock is taken.
//! 2. Acquire both wallet row locks in canonical key order, each with a
//!    bounded wait (timeout -> `Conflict`, safe to retry, no effect).
//! 3. Re-check funds under the lock (no TOCTOU gap), apply debit+credit,
//!    append one ledger entry per delta while the locks are still held.
//! 4. Release; publish wallet-changed events.
//!
//! Either every step commits or none does; no partial state is ever
//! visible to another task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::MutexGuard;
use tokio::time::timeout;
use tracing::{debug, info};
use ulid::Ulid;

use crate::core_types::{Credits, SignedCredits, UserId};
use crate::error::LedgerError;
use crate::ledger::{LedgerBook, LedgerEntry, TransactionKind};
use crate::notifier::{ChangeFeed, LedgerEvent};
use crate::store::{WalletRow, WalletStore};
use crate::wallet::{Wallet, WalletKey, WalletType};

pub struct TransferCoordinator {
    store: Arc<WalletStore>,
    ledger: Arc<LedgerBook>,
    feed: Arc<ChangeFeed>,
    lock_wait: Duration,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<WalletStore>,
        ledger: Arc<LedgerBook>,
        feed: Arc<ChangeFeed>,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            feed,
            lock_wait,
        }
    }

    /// Internal move between two of one member's own wallets
    pub async fn transfer(
        &self,
        user_id: UserId,
        from_type: WalletType,
        to_type: WalletType,
        amount: Credits,
    ) -> Result<(), LedgerError> {
        if from_type == to_type {
            return Err(LedgerError::InvalidInput(
                "source and target wallet cannot be the same",
            ));
        }
        self.move_between(
            WalletKey::new(user_id, from_type),
            WalletKey::new(user_id, to_type),
            amount,
            TransactionKind::InternalMove,
            "internal wallet move",
            None,
        )
        .await
    }

    /// Generalized two-wallet move; backs loan disbursement/repayment and
    /// every other settlement between distinct parties.
    pub async fn move_between(
        &self,
        from: WalletKey,
        to: WalletKey,
        amount: Credits,
        kind: TransactionKind,
        description: &str,
        reference: Option<Ulid>,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("amount must be positive"));
        }
        if from == to {
            return Err(LedgerError::InvalidInput(
                "source and target wallet cannot be the same",
            ));
        }

        // Canonical lock order prevents deadlock between concurrent
        // transfers touching the same pair in opposite directions.
        let from_first = from < to;
        let (first_key, second_key) = if from_first { (from, to) } else { (to, from) };
        let first_row = self.store.row(first_key);
        let second_row = self.store.row(second_key);

        let mut first_guard = self.lock_row(&first_row).await?;
        let mut second_guard = self.lock_row(&second_row).await?;

        let (from_wallet, to_wallet): (&mut Wallet, &mut Wallet) = if from_first {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        // Funds and headroom are verified under the lock; after these two
        // checks the debit+credit pair cannot fail halfway.
        if from_wallet.balance() < amount {
            debug!(%from, %to, amount, "transfer rejected: insufficient balance");
            return Err(LedgerError::InsufficientBalance);
        }
        if !to_wallet.can_credit(amount) {
            return Err(LedgerError::Overflow);
        }
        from_wallet.debit(amount)?;
        to_wallet.credit(amount)?;

        self.ledger.append(LedgerEntry::new(
            from.user_id,
            from.wallet_type,
            -(amount as SignedCredits),
            kind,
            description,
            reference,
            from_wallet.balance(),
        ));
        self.ledger.append(LedgerEntry::new(
            to.user_id,
            to.wallet_type,
            amount as SignedCredits,
            kind,
            description,
            reference,
            to_wallet.balance(),
        ));

        drop(second_guard);
        drop(first_guard);

        info!(%from, %to, amount, kind = kind.as_str(), "transfer committed");
        self.feed.publish(LedgerEvent::WalletChanged {
            user_id: from.user_id,
        });
        if to.user_id != from.user_id {
            self.feed
                .publish(LedgerEvent::WalletChanged { user_id: to.user_id });
        }
        Ok(())
    }

    /// Credit a wallet from the external payment rail (approved cash-in).
    ///
    /// The rail is outside the wallet universe, so this writes a single
    /// ledger entry and grows total supply by exactly `amount`.
    pub async fn deposit_from_rail(
        &self,
        key: WalletKey,
        amount: Credits,
        kind: TransactionKind,
        description: &str,
        reference: Option<Ulid>,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("amount must be positive"));
        }
        let row = self.store.row(key);
        let mut wallet = self.lock_row(&row).await?;

        if !wallet.can_credit(amount) {
            return Err(LedgerError::Overflow);
        }
        wallet.credit(amount)?;
        self.ledger.append(LedgerEntry::new(
            key.user_id,
            key.wallet_type,
            amount as SignedCredits,
            kind,
            description,
            reference,
            wallet.balance(),
        ));
        drop(wallet);

        info!(%key, amount, kind = kind.as_str(), "rail deposit committed");
        self.feed.publish(LedgerEvent::WalletChanged {
            user_id: key.user_id,
        });
        Ok(())
    }

    /// Debit a wallet toward the external payment rail (approved cash-out).
    pub async fn withdraw_to_rail(
        &self,
        key: WalletKey,
        amount: Credits,
        kind: TransactionKind,
        description: &str,
        reference: Option<Ulid>,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("amount must be positive"));
        }
        let row = self.store.row(key);
        let mut wallet = self.lock_row(&row).await?;

        if wallet.balance() < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        wallet.debit(amount)?;
        self.ledger.append(LedgerEntry::new(
            key.user_id,
            key.wallet_type,
            -(amount as SignedCredits),
            kind,
            description,
            reference,
            wallet.balance(),
        ));
        drop(wallet);

        info!(%key, amount, kind = kind.as_str(), "rail withdrawal committed");
        self.feed.publish(LedgerEvent::WalletChanged {
            user_id: key.user_id,
        });
        Ok(())
    }

    /// Bounded-wait row lock; timeout maps to the retryable `Conflict`.
    async fn lock_row<'a>(
        &self,
        row: &'a WalletRow,
    ) -> Result<MutexGuard<'a, Wallet>, LedgerError> {
        timeout(self.lock_wait, row.lock())
            .await
            .map_err(|_| LedgerError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> (Arc<WalletStore>, Arc<LedgerBook>, TransferCoordinator) {
        let store = Arc::new(WalletStore::new());
        let ledger = Arc::new(LedgerBook::new());
        let feed = Arc::new(ChangeFeed::new(16));
        let coordinator = TransferCoordinator::new(
            store.clone(),
            ledger.clone(),
            feed,
            Duration::from_millis(250),
        );
        (store, ledger, coordinator)
    }

    async fn seed(store: &WalletStore, user_id: UserId, wallet_type: WalletType, units: Credits) {
        store
            .row(WalletKey::new(user_id, wallet_type))
            .lock()
            .await
            .credit(units)
            .unwrap();
    }

    #[tokio::test]
    async fn test_internal_move() {
        let (store, ledger, coordinator) = coordinator();
        seed(&store, 1, WalletType::Main, 100).await;

        coordinator
            .transfer(1, WalletType::Main, WalletType::Task, 40)
            .await
            .unwrap();

        let snap = store.balances(1).await;
        assert_eq!(snap.main, 60);
        assert_eq!(snap.task, 40);

        // Exactly one entry per delta
        let entries = ledger.entries_for(1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, -40);
        assert_eq!(entries[0].balance_after, 60);
        assert_eq!(entries[1].amount, 40);
        assert_eq!(entries[1].balance_after, 40);
    }

    #[tokio::test]
    async fn test_rejects_before_locking() {
        let (_, ledger, coordinator) = coordinator();
        assert_eq!(
            coordinator
                .transfer(1, WalletType::Main, WalletType::Main, 10)
                .await,
            Err(LedgerError::InvalidInput(
                "source and target wallet cannot be the same"
            ))
        );
        assert_eq!(
            coordinator
                .transfer(1, WalletType::Main, WalletType::Task, 0)
                .await,
            Err(LedgerError::InvalidInput("amount must be positive"))
        );
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_balance_no_mutation() {
        let (store, ledger, coordinator) = coordinator();
        seed(&store, 1, WalletType::Main, 30).await;

        let result = coordinator
            .transfer(1, WalletType::Main, WalletType::Task, 40)
            .await;
        assert_eq!(result, Err(LedgerError::InsufficientBalance));
        assert_eq!(store.balances(1).await.main, 30);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize() {
        let (store, _, coordinator) = coordinator();
        seed(&store, 1, WalletType::Main, 100).await;
        let coordinator = Arc::new(coordinator);

        // Combined amount exceeds the balance: exactly one must win.
        let a = coordinator.clone();
        let b = coordinator.clone();
        let (ra, rb) = tokio::join!(
            a.transfer(1, WalletType::Main, WalletType::Task, 60),
            b.transfer(1, WalletType::Main, WalletType::Royalty, 60),
        );

        assert!(ra.is_ok() ^ rb.is_ok(), "exactly one transfer must win");
        let loser = if ra.is_ok() { rb } else { ra };
        assert_eq!(loser, Err(LedgerError::InsufficientBalance));

        let snap = store.balances(1).await;
        assert_eq!(snap.main, 40);
        assert_eq!(snap.total(), 100); // conservation
    }

    #[tokio::test]
    async fn test_lock_timeout_is_conflict() {
        let (store, _, coordinator) = coordinator();
        seed(&store, 1, WalletType::Main, 100).await;

        // Hold the source row so the transfer cannot acquire it.
        let row = store.row(WalletKey::new(1, WalletType::Main));
        let _held = row.lock().await;

        let result = coordinator
            .transfer(1, WalletType::Main, WalletType::Task, 10)
            .await;
        assert_eq!(result, Err(LedgerError::Conflict));
    }

    #[tokio::test]
    async fn test_rail_deposit_and_withdraw() {
        let (store, ledger, coordinator) = coordinator();
        let key = WalletKey::new(9, WalletType::Main);

        coordinator
            .deposit_from_rail(key, 500, TransactionKind::CashIn, "cash-in", None)
            .await
            .unwrap();
        assert_eq!(store.balance(key).await, 500);
        assert_eq!(store.total_supply().await, 500);

        coordinator
            .withdraw_to_rail(key, 200, TransactionKind::CashOut, "cash-out", None)
            .await
            .unwrap();
        assert_eq!(store.balance(key).await, 300);
        assert_eq!(store.total_supply().await, 300);

        assert_eq!(
            coordinator
                .withdraw_to_rail(key, 1_000, TransactionKind::CashOut, "cash-out", None)
                .await,
            Err(LedgerError::InsufficientBalance)
        );
        assert_eq!(ledger.entries_for(9).len(), 2);
    }

    #[tokio::test]
    async fn test_cross_user_move_is_conserved() {
        let (store, _, coordinator) = coordinator();
        seed(&store, 1, WalletType::Main, 1_000).await;

        coordinator
            .move_between(
                WalletKey::new(1, WalletType::Main),
                WalletKey::new(2, WalletType::Main),
                250,
                TransactionKind::LoanDisbursement,
                "loan principal",
                None,
            )
            .await
            .unwrap();

        assert_eq!(store.balances(1).await.main, 750);
        assert_eq!(store.balances(2).await.main, 250);
        assert_eq!(store.total_supply().await, 1_000);
    }
}
