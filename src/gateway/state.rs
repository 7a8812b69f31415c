use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::coordinator::TransferCoordinator;
use crate::ledger::LedgerBook;
use crate::loans::LoanEngine;
use crate::notifier::ChangeFeed;
use crate::requests::RequestEngine;
use crate::store::WalletStore;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WalletStore>,
    pub ledger: Arc<LedgerBook>,
    pub coordinator: Arc<TransferCoordinator>,
    pub requests: Arc<RequestEngine>,
    pub loans: Arc<LoanEngine>,
    pub feed: Arc<ChangeFeed>,
    pub ledger_config: LedgerConfig,
}

impl AppState {
    pub fn new(
        store: Arc<WalletStore>,
        ledger: Arc<LedgerBook>,
        coordinator: Arc<TransferCoordinator>,
        requests: Arc<RequestEngine>,
        loans: Arc<LoanEngine>,
        feed: Arc<ChangeFeed>,
        ledger_config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            coordinator,
            requests,
            loans,
            feed,
            ledger_config,
        }
    }
}
