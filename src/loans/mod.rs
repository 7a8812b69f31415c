//! Loan Lifecycle Engine
//!
//! Peer-to-peer loans: a lender posts an offer (principal escrowed), a
//! borrower accepts (principal disbursed, due date set), and the loan
//! resolves by repayment, default at the periodic sweep, or cancellation
//! of an unaccepted offer. Every fund movement goes through the Transfer
//! Coordinator.

pub mod engine;
pub mod models;

pub use engine::{LoanEngine, SweepReport};
pub use models::{Loan, LoanStatus, LoanTerms};
