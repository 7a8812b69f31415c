//! Austral Ledger - service entry point
//!
//! Wiring order matters: the Wallet Store and ledger book come first,
//! the Transfer Coordinator owns all mutation on top of them, and the
//! request/loan engines only ever call the coordinator.
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌───────────────┐    ┌──────────┐
//! │  Config  │───▶│ WalletStore │───▶│  Coordinator  │───▶│ Gateway  │
//! │  (YAML)  │    │ + LedgerBook│    │ + Engines     │    │  (axum)  │
//! └──────────┘    └─────────────┘    └───────────────┘    └──────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use austral_ledger::config::AppConfig;
use austral_ledger::coordinator::TransferCoordinator;
use austral_ledger::gateway::{self, state::AppState};
use austral_ledger::ledger::LedgerBook;
use austral_ledger::loans::LoanEngine;
use austral_ledger::logging;
use austral_ledger::notifier::{ChangeFeed, TracingSink};
use austral_ledger::requests::RequestEngine;
use austral_ledger::store::WalletStore;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _guard = logging::init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %env,
        "austral ledger starting"
    );

    let ledger_config = config.ledger.clone();

    let store = Arc::new(WalletStore::new());
    let ledger = Arc::new(LedgerBook::new());
    let feed = Arc::new(ChangeFeed::new(ledger_config.feed_capacity).with_sink(Arc::new(TracingSink)));
    let coordinator = Arc::new(TransferCoordinator::new(
        store.clone(),
        ledger.clone(),
        feed.clone(),
        Duration::from_millis(ledger_config.lock_wait_ms),
    ));
    let loans = Arc::new(LoanEngine::new(
        coordinator.clone(),
        feed.clone(),
        ledger_config.loan_processing_fee_rate,
    ));
    let requests = Arc::new(RequestEngine::new(
        coordinator.clone(),
        loans.clone(),
        feed.clone(),
        ledger_config.cash_out_fee_rate,
    ));

    // Periodic sweep: resolve loans past their due date. The engine's
    // gate keeps overlapping runs out even if a tick fires long.
    let sweep_loans = loans.clone();
    let sweep_interval = Duration::from_secs(ledger_config.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = sweep_loans.sweep_expired().await;
            if report.repaid_count > 0 || report.defaulted_count > 0 {
                info!(
                    repaid = report.repaid_count,
                    defaulted = report.defaulted_count,
                    total_repaid = report.total_repaid,
                    "periodic sweep resolved loans"
                );
            }
        }
    });

    let state = Arc::new(AppState::new(
        store,
        ledger,
        coordinator,
        requests,
        loans,
        feed,
        ledger_config,
    ));

    gateway::serve(&config.gateway, state).await
}
