//! Request Workflow Engine
//!
//! Admin-reviewed cash-in/cash-out requests against the external payment
//! rail. A request holds no funds until an admin approves it; approval
//! settles through the Transfer Coordinator and the row becomes immutable
//! once terminal.

pub mod engine;
pub mod models;

pub use engine::RequestEngine;
pub use models::{CashDirection, CashRequest, CreateCashRequest, RequestStatus};
