//! Optimistic Reconciliation Layer
//!
//! Client-local overlay that shows a transfer's result with zero
//! perceived latency while the authoritative call is in flight.
//!
//! The displayed view is an explicit composition: the last authoritative
//! snapshot plus the deltas of every outstanding optimistic entry. No
//! shared balance variable is ever mutated in place, which makes
//! rollback mechanical: an entry that settles with an error simply stops
//! composing.
//!
//! # Guarantee
//!
//! The displayed view never diverges from "authoritative ± exactly the
//! currently pending optimistic deltas". Sequential operations compose:
//! a second transfer started while one is pending validates against the
//! already-adjusted view.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::coordinator::TransferCoordinator;
use crate::core_types::{Credits, SignedCredits, UserId};
use crate::error::LedgerError;
use crate::store::WalletStore;
use crate::wallet::{WalletSnapshot, WalletType};

/// Settlement state of one optimistic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticStatus {
    Pending,
    Success,
    Error,
}

/// One tentative, client-local transfer. Never persisted server-side.
#[derive(Debug, Clone)]
pub struct OptimisticTransaction {
    pub id: u64,
    pub from_wallet: WalletType,
    pub to_wallet: WalletType,
    pub amount: Credits,
    pub status: OptimisticStatus,
    pub started_at: Instant,
    settled_at: Option<Instant>,
    /// Success entries stop composing once a refresh folded their effect
    /// into the authoritative snapshot.
    folded: bool,
}

impl OptimisticTransaction {
    /// Does this entry still contribute to the displayed view?
    fn composes(&self) -> bool {
        match self.status {
            OptimisticStatus::Pending => true,
            OptimisticStatus::Success => !self.folded,
            OptimisticStatus::Error => false,
        }
    }

    fn delta_for(&self, wallet_type: WalletType) -> SignedCredits {
        let mut delta: SignedCredits = 0;
        if self.from_wallet == wallet_type {
            delta -= self.amount as SignedCredits;
        }
        if self.to_wallet == wallet_type {
            delta += self.amount as SignedCredits;
        }
        delta
    }
}

/// Seam to the authoritative ledger. The production backend wraps the
/// store and coordinator; tests inject failures through a mock.
#[async_trait]
pub trait AuthoritativeBackend: Send + Sync {
    async fn transfer(
        &self,
        user_id: UserId,
        from: WalletType,
        to: WalletType,
        amount: Credits,
    ) -> Result<(), LedgerError>;

    async fn balances(&self, user_id: UserId) -> WalletSnapshot;
}

/// Production backend: straight through to the ledger core
pub struct LedgerBackend {
    store: Arc<WalletStore>,
    coordinator: Arc<TransferCoordinator>,
}

impl LedgerBackend {
    pub fn new(store: Arc<WalletStore>, coordinator: Arc<TransferCoordinator>) -> Self {
        Self { store, coordinator }
    }
}

#[async_trait]
impl AuthoritativeBackend for LedgerBackend {
    async fn transfer(
        &self,
        user_id: UserId,
        from: WalletType,
        to: WalletType,
        amount: Credits,
    ) -> Result<(), LedgerError> {
        self.coordinator.transfer(user_id, from, to, amount).await
    }

    async fn balances(&self, user_id: UserId) -> WalletSnapshot {
        self.store.balances(user_id).await
    }
}

/// Client-local optimistic view of one member's wallets
pub struct OptimisticLedger {
    user_id: UserId,
    backend: Arc<dyn AuthoritativeBackend>,
    /// Last authoritative snapshot
    snapshot: WalletSnapshot,
    /// Outstanding optimistic entries, oldest first
    entries: Vec<OptimisticTransaction>,
    /// Set when a settlement made the snapshot out of date
    stale: bool,
    last_attempt: Option<Instant>,
    debounce: Duration,
    grace: Duration,
    next_id: u64,
}

impl OptimisticLedger {
    pub async fn new(
        user_id: UserId,
        backend: Arc<dyn AuthoritativeBackend>,
        debounce: Duration,
        grace: Duration,
    ) -> Self {
        let snapshot = backend.balances(user_id).await;
        Self {
            user_id,
            backend,
            snapshot,
            entries: Vec::new(),
            stale: false,
            last_attempt: None,
            debounce,
            grace,
            next_id: 1,
        }
    }

    /// The balance shown to the user: authoritative snapshot composed
    /// with every outstanding optimistic delta.
    pub fn displayed(&self, wallet_type: WalletType) -> Credits {
        let base = self.snapshot.get(wallet_type) as SignedCredits;
        let overlay: SignedCredits = self
            .pending_deltas()
            .get(&wallet_type)
            .copied()
            .unwrap_or(0);
        (base + overlay).max(0) as Credits
    }

    /// Apply a transfer tentatively, then settle it authoritatively.
    ///
    /// Returns the authoritative outcome; on failure the tentative
    /// effect has already been rolled back.
    pub async fn optimistic_transfer(
        &mut self,
        from: WalletType,
        to: WalletType,
        amount: f64,
    ) -> Result<(), LedgerError> {
        let now = Instant::now();
        if let Some(previous) = self.last_attempt {
            if now.duration_since(previous) < self.debounce {
                return Err(LedgerError::TooFast);
            }
        }
        self.last_attempt = Some(now);

        // Floor to whole units at the boundary; the core never sees
        // fractional credit.
        if !amount.is_finite() || amount >= u64::MAX as f64 {
            return Err(LedgerError::InvalidInput("amount out of range"));
        }
        let units = amount.floor();
        if units < 1.0 {
            return Err(LedgerError::InvalidInput("amount must be positive"));
        }
        let units = units as Credits;
        if from == to {
            return Err(LedgerError::InvalidInput(
                "source and target wallet cannot be the same",
            ));
        }
        // Pessimistic pre-check against the already-adjusted view; the
        // coordinator re-verifies under the wallet lock.
        if self.displayed(from) < units {
            return Err(LedgerError::InsufficientBalance);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(OptimisticTransaction {
            id,
            from_wallet: from,
            to_wallet: to,
            amount: units,
            status: OptimisticStatus::Pending,
            started_at: now,
            settled_at: None,
            folded: false,
        });
        debug!(user_id = self.user_id, id, %from, %to, units, "optimistic transfer applied");

        let result = self
            .backend
            .transfer(self.user_id, from, to, units)
            .await;

        let settled = Instant::now();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.settled_at = Some(settled);
            match &result {
                Ok(()) => {
                    entry.status = OptimisticStatus::Success;
                    // Snapshot is now behind the authoritative ledger;
                    // the next refresh folds this entry.
                    self.stale = true;
                }
                Err(e) => {
                    // Mechanical rollback: the entry stops composing and
                    // the displayed view reverts to its pre-call values.
                    entry.status = OptimisticStatus::Error;
                    debug!(user_id = self.user_id, id, error = %e, "optimistic transfer rolled back");
                }
            }
        }
        result
    }

    /// Pull authoritative balances and fold settled successes into them.
    pub async fn refresh(&mut self) {
        let snapshot = self.backend.balances(self.user_id).await;
        for entry in &mut self.entries {
            if entry.status == OptimisticStatus::Success {
                entry.folded = true;
            }
        }
        self.snapshot = snapshot;
        self.stale = false;
    }

    /// Drop settled entries past the grace window. Success entries only
    /// leave once a refresh has folded them, so the displayed view never
    /// loses an unfolded delta.
    pub fn purge_settled(&mut self) {
        let grace = self.grace;
        self.entries.retain(|entry| {
            let elapsed = entry
                .settled_at
                .map(|at| at.elapsed() >= grace)
                .unwrap_or(false);
            match entry.status {
                OptimisticStatus::Pending => true,
                OptimisticStatus::Success => !(entry.folded && elapsed),
                OptimisticStatus::Error => !elapsed,
            }
        });
    }

    /// Whether the cached snapshot is known to be behind the ledger
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Outstanding entries, for history display
    pub fn entries(&self) -> &[OptimisticTransaction] {
        &self.entries
    }

    fn pending_deltas(&self) -> FxHashMap<WalletType, SignedCredits> {
        let mut deltas: FxHashMap<WalletType, SignedCredits> = FxHashMap::default();
        for entry in self.entries.iter().filter(|e| e.composes()) {
            for wallet_type in WalletType::ALL {
                let delta = entry.delta_for(wallet_type);
                if delta != 0 {
                    *deltas.entry(wallet_type).or_insert(0) += delta;
                }
            }
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend with scriptable failures
    struct MockBackend {
        snapshot: Mutex<WalletSnapshot>,
        fail_with: Mutex<Option<LedgerError>>,
    }

    impl MockBackend {
        fn with_main(units: Credits) -> Self {
            Self {
                snapshot: Mutex::new(WalletSnapshot {
                    main: units,
                    ..Default::default()
                }),
                fail_with: Mutex::new(None),
            }
        }

        fn fail_next(&self, error: LedgerError) {
            *self.fail_with.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl AuthoritativeBackend for MockBackend {
        async fn transfer(
            &self,
            _user_id: UserId,
            from: WalletType,
            to: WalletType,
            amount: Credits,
        ) -> Result<(), LedgerError> {
            if let Some(error) = self.fail_with.lock().unwrap().take() {
                return Err(error);
            }
            let mut snapshot = self.snapshot.lock().unwrap();
            if snapshot.get(from) < amount {
                return Err(LedgerError::InsufficientBalance);
            }
            let from_units = snapshot.get(from) - amount;
            let to_units = snapshot.get(to) + amount;
            snapshot.set(from, from_units);
            snapshot.set(to, to_units);
            Ok(())
        }

        async fn balances(&self, _user_id: UserId) -> WalletSnapshot {
            *self.snapshot.lock().unwrap()
        }
    }

    fn no_debounce() -> Duration {
        Duration::from_millis(0)
    }

    #[tokio::test]
    async fn test_success_path_shows_instantly_and_folds() {
        let backend = Arc::new(MockBackend::with_main(100));
        let mut view =
            OptimisticLedger::new(1, backend, no_debounce(), Duration::from_millis(0)).await;

        view.optimistic_transfer(WalletType::Main, WalletType::Task, 25.0)
            .await
            .unwrap();

        // Shadow view reflects the transfer immediately
        assert_eq!(view.displayed(WalletType::Main), 75);
        assert_eq!(view.displayed(WalletType::Task), 25);
        assert!(view.is_stale());

        // Refresh folds the settled entry; view is unchanged
        view.refresh().await;
        assert_eq!(view.displayed(WalletType::Main), 75);
        assert_eq!(view.displayed(WalletType::Task), 25);
        assert!(!view.is_stale());

        // Purge drops the folded entry; still unchanged
        view.purge_settled();
        assert!(view.entries().is_empty());
        assert_eq!(view.displayed(WalletType::Main), 75);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_to_pre_call_values() {
        let backend = Arc::new(MockBackend::with_main(100));
        backend.fail_next(LedgerError::Conflict);
        let mut view = OptimisticLedger::new(
            1,
            backend.clone(),
            no_debounce(),
            Duration::from_millis(50),
        )
        .await;

        let result = view
            .optimistic_transfer(WalletType::Main, WalletType::Task, 25.0)
            .await;
        assert_eq!(result, Err(LedgerError::Conflict));

        // Displayed balance equals the balance immediately before the call
        assert_eq!(view.displayed(WalletType::Main), 100);
        assert_eq!(view.displayed(WalletType::Task), 0);

        // The erroneous entry lingers for display, then purges
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.entries()[0].status, OptimisticStatus::Error);
        tokio::time::sleep(Duration::from_millis(60)).await;
        view.purge_settled();
        assert!(view.entries().is_empty());
    }

    #[tokio::test]
    async fn test_debounce_rejects_rapid_calls() {
        let backend = Arc::new(MockBackend::with_main(100));
        let mut view = OptimisticLedger::new(
            1,
            backend,
            Duration::from_millis(500),
            Duration::from_millis(0),
        )
        .await;

        view.optimistic_transfer(WalletType::Main, WalletType::Task, 10.0)
            .await
            .unwrap();
        assert_eq!(
            view.optimistic_transfer(WalletType::Main, WalletType::Task, 10.0)
                .await,
            Err(LedgerError::TooFast)
        );
        // Rejected call changed nothing
        assert_eq!(view.displayed(WalletType::Main), 90);
    }

    #[tokio::test]
    async fn test_pre_check_uses_adjusted_view() {
        let backend = Arc::new(MockBackend::with_main(100));
        let mut view =
            OptimisticLedger::new(1, backend, no_debounce(), Duration::from_millis(0)).await;

        view.optimistic_transfer(WalletType::Main, WalletType::Task, 80.0)
            .await
            .unwrap();

        // Only 20 left in the adjusted view, despite the stale snapshot
        assert_eq!(
            view.optimistic_transfer(WalletType::Main, WalletType::Task, 50.0)
                .await,
            Err(LedgerError::InsufficientBalance)
        );
    }

    #[tokio::test]
    async fn test_amount_floored_and_validated() {
        let backend = Arc::new(MockBackend::with_main(100));
        let mut view =
            OptimisticLedger::new(1, backend, no_debounce(), Duration::from_millis(0)).await;

        // 25.9 floors to 25
        view.optimistic_transfer(WalletType::Main, WalletType::Task, 25.9)
            .await
            .unwrap();
        assert_eq!(view.displayed(WalletType::Task), 25);

        assert!(matches!(
            view.optimistic_transfer(WalletType::Main, WalletType::Task, 0.4)
                .await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            view.optimistic_transfer(WalletType::Main, WalletType::Task, f64::NAN)
                .await,
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
