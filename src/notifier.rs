//! Change feed and notification fan-out
//!
//! Collaborators converge on authoritative state two ways:
//! - **Polling**: snapshot getters on the store/engines (observed cadence:
//!   15s for wallets/requests, 30-60s for admin aggregates).
//! - **Push**: a broadcast feed of [`LedgerEvent`]s keyed by user, so a
//!   stricter client can cut latency without changing the ledger contract.
//!
//! Sinks are fire-and-forget: a slow or broken sink never blocks or fails
//! a ledger commit.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::core_types::{Credits, UserId};
use crate::requests::RequestStatus;

/// Status-change events raised by the ledger core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    WalletChanged {
        user_id: UserId,
    },
    RequestDecided {
        request_id: Ulid,
        user_id: UserId,
        status: RequestStatus,
    },
    LoanOffered {
        loan_id: Ulid,
        lender_id: UserId,
        principal: Credits,
    },
    LoanAccepted {
        loan_id: Ulid,
        borrower_id: UserId,
    },
    LoanRepaid {
        loan_id: Ulid,
        borrower_id: UserId,
        lender_id: UserId,
        amount: Credits,
    },
    LoanDefaulted {
        loan_id: Ulid,
        borrower_id: UserId,
        lender_id: UserId,
    },
    LoanCancelled {
        loan_id: Ulid,
        lender_id: UserId,
    },
}

impl LedgerEvent {
    /// The member this event primarily concerns (for per-user filtering)
    pub fn user_id(&self) -> UserId {
        match self {
            LedgerEvent::WalletChanged { user_id } => *user_id,
            LedgerEvent::RequestDecided { user_id, .. } => *user_id,
            LedgerEvent::LoanOffered { lender_id, .. } => *lender_id,
            LedgerEvent::LoanAccepted { borrower_id, .. } => *borrower_id,
            LedgerEvent::LoanRepaid { borrower_id, .. } => *borrower_id,
            LedgerEvent::LoanDefaulted { borrower_id, .. } => *borrower_id,
            LedgerEvent::LoanCancelled { lender_id, .. } => *lender_id,
        }
    }
}

/// Receives `(event_type, payload)` on state transitions for user display.
/// Fire-and-forget; the core requires no acknowledgment.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &LedgerEvent);
}

/// Default sink: structured log line per event
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &LedgerEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(target: "austral_ledger::notify", %payload, "ledger event");
    }
}

/// Broadcast feed of ledger events plus registered sinks
pub struct ChangeFeed {
    tx: broadcast::Sender<LedgerEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sinks: Vec::new(),
        }
    }

    /// Register a sink (builder-style, before the feed is shared)
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Subscribe to the push feed; consumers filter by `event.user_id()`
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to sinks and subscribers.
    /// A feed with no subscribers is not an error.
    pub fn publish(&self, event: LedgerEvent) {
        for sink in &self.sinks {
            sink.notify(&event);
        }
        let _ = self.tx.send(event);
    }
}
