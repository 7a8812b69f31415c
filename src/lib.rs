//! Austral Ledger - Membership Credit Ledger Core
//!
//! Multi-wallet ledger and transaction-reconciliation engine for a
//! membership platform: members hold ₳ balances across per-user wallets
//! and move value between each other, into/out of a lending escrow, and
//! into/out of an external payment rail via admin-reviewed requests.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, Credits, etc.)
//! - [`balance`] - Enforced balance type
//! - [`wallet`] - Wallet buckets, keys and snapshots
//! - [`ledger`] - Append-only settlement audit log
//! - [`store`] - Wallet Store (sole owner of balance state)
//! - [`coordinator`] - Transfer Coordinator (all-or-nothing mutations)
//! - [`requests`] - Cash-in/cash-out approval state machine
//! - [`loans`] - Peer-to-peer loan lifecycle and expiry sweep
//! - [`optimistic`] - Client-local optimistic reconciliation overlay
//! - [`notifier`] - Change feed and notification fan-out
//! - [`gateway`] - axum HTTP surface

// Core types - must be first!
pub mod core_types;

// Ambient stack
pub mod config;
pub mod context;
pub mod error;
pub mod logging;

// Ledger components
pub mod balance;
pub mod coordinator;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod loans;
pub mod notifier;
pub mod optimistic;
pub mod requests;
pub mod store;
pub mod wallet;

// Convenient re-exports at crate root
pub use balance::Balance;
pub use context::RequestContext;
pub use coordinator::TransferCoordinator;
pub use core_types::{Credits, ESCROW_USER, RateScaled, SignedCredits, UserId};
pub use error::LedgerError;
pub use ledger::{LedgerBook, LedgerEntry, TransactionKind};
pub use loans::{Loan, LoanEngine, LoanStatus, LoanTerms, SweepReport};
pub use notifier::{ChangeFeed, LedgerEvent, NotificationSink, TracingSink};
pub use optimistic::{AuthoritativeBackend, LedgerBackend, OptimisticLedger};
pub use requests::{CashDirection, CashRequest, RequestEngine, RequestStatus};
pub use store::WalletStore;
pub use wallet::{Wallet, WalletKey, WalletSnapshot, WalletType};
