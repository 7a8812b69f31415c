//! Wallet Store - the sole owner of balance state
//!
//! Holds every wallet row behind its own async mutex. The store hands out
//! row handles; actually mutating a row is the
//! [`TransferCoordinator`](crate::coordinator::TransferCoordinator)'s job,
//! which is the only component that writes balances.
//!
//! # Concurrency
//!
//! Per-row mutual exclusion plays the role of row-level locking: two
//! concurrent transfers touching the same wallet cannot both observe the
//! pre-mutation balance. Rows are created lazily at balance 0 on first
//! reference.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::core_types::{Credits, UserId};
use crate::wallet::{Wallet, WalletKey, WalletSnapshot, WalletType};

/// One lockable wallet row
pub type WalletRow = Arc<Mutex<Wallet>>;

#[derive(Default)]
pub struct WalletStore {
    wallets: DashMap<WalletKey, WalletRow>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a wallet row, creating it at balance 0 on first reference
    pub fn row(&self, key: WalletKey) -> WalletRow {
        self.wallets
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Wallet::new(key))))
            .clone()
    }

    /// Handle to an existing row only
    pub fn existing_row(&self, key: WalletKey) -> Option<WalletRow> {
        self.wallets.get(&key).map(|e| e.value().clone())
    }

    /// Number of wallet rows created so far
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Read one balance (0 for a wallet never referenced)
    pub async fn balance(&self, key: WalletKey) -> Credits {
        match self.existing_row(key) {
            Some(row) => row.lock().await.balance(),
            None => 0,
        }
    }

    /// Current wallet snapshot for one member - the poll interface
    pub async fn balances(&self, user_id: UserId) -> WalletSnapshot {
        let mut snapshot = WalletSnapshot::default();
        for wallet_type in WalletType::ALL {
            let units = self.balance(WalletKey::new(user_id, wallet_type)).await;
            snapshot.set(wallet_type, units);
        }
        snapshot
    }

    /// Sum of every balance in the store (conservation checks, stats)
    pub async fn total_supply(&self) -> Credits {
        let rows: Vec<WalletRow> = self.wallets.iter().map(|e| e.value().clone()).collect();
        let mut total: Credits = 0;
        for row in rows {
            total = total.saturating_add(row.lock().await.balance());
        }
        total
    }
}
