//! Cash request state machine
//!
//! `pending -> {approved, rejected, on_hold, flagged, processing} ->
//! {approved, rejected}`. Approval settles through the Transfer
//! Coordinator; a settlement failure leaves the request in its prior
//! state with the error surfaced unchanged.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::context::RequestContext;
use crate::coordinator::TransferCoordinator;
use crate::core_types::{Credits, RateScaled, UserId};
use crate::error::LedgerError;
use crate::fees::scale_by_rate;
use crate::ledger::TransactionKind;
use crate::loans::LoanEngine;
use crate::notifier::{ChangeFeed, LedgerEvent};
use crate::wallet::{WalletKey, WalletType};

use super::models::{CashDirection, CashRequest, CreateCashRequest, RequestStatus};

type RequestRow = Arc<Mutex<CashRequest>>;

pub struct RequestEngine {
    requests: DashMap<Ulid, RequestRow>,
    coordinator: Arc<TransferCoordinator>,
    loans: Arc<LoanEngine>,
    feed: Arc<ChangeFeed>,
    cash_out_fee_rate: RateScaled,
}

impl RequestEngine {
    pub fn new(
        coordinator: Arc<TransferCoordinator>,
        loans: Arc<LoanEngine>,
        feed: Arc<ChangeFeed>,
        cash_out_fee_rate: RateScaled,
    ) -> Self {
        Self {
            requests: DashMap::new(),
            coordinator,
            loans,
            feed,
            cash_out_fee_rate,
        }
    }

    /// Create a request in `pending`; no balance effect yet.
    ///
    /// The cash-out fee is fixed here from the configured rate so the
    /// admin decides on the same figures the member saw.
    pub fn create(
        &self,
        ctx: &RequestContext,
        params: CreateCashRequest,
    ) -> Result<Ulid, LedgerError> {
        if params.amount == 0 {
            return Err(LedgerError::InvalidInput("amount must be positive"));
        }
        let fee_amount = match params.direction {
            CashDirection::CashIn => 0,
            CashDirection::CashOut => scale_by_rate(params.amount, self.cash_out_fee_rate),
        };
        let net_amount = params
            .amount
            .checked_sub(fee_amount)
            .filter(|net| *net > 0)
            .ok_or(LedgerError::InvalidInput("amount does not cover the fee"))?;

        let request = CashRequest {
            id: Ulid::new(),
            user_id: ctx.user_id,
            direction: params.direction,
            amount: params.amount,
            fee_amount,
            net_amount,
            payment_method: params.payment_method,
            proof_ref: params.proof_ref,
            pin_verified: params.pin_verified,
            status: RequestStatus::Pending,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };
        let id = request.id;
        info!(request_id = %id, user_id = ctx.user_id, direction = %request.direction,
              amount = request.amount, "cash request created");
        self.requests.insert(id, Arc::new(Mutex::new(request)));
        Ok(id)
    }

    /// Approve and settle. Valid from any non-terminal state.
    ///
    /// Cash-in credits the member's main wallet from the rail; cash-out
    /// debits the full `amount` (the member receives `net_amount`
    /// externally). The status only moves once the transfer committed.
    pub async fn approve(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        ctx.require_admin()?;
        let row = self.row(id)?;
        let mut request = row.lock().await;

        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized);
        }

        let main = WalletKey::new(request.user_id, WalletType::Main);
        match request.direction {
            CashDirection::CashIn => {
                self.coordinator
                    .deposit_from_rail(
                        main,
                        request.amount,
                        TransactionKind::CashIn,
                        "cash-in approved",
                        Some(request.id),
                    )
                    .await?;
            }
            CashDirection::CashOut => {
                self.check_cash_out_gate(&request).await?;
                self.coordinator
                    .withdraw_to_rail(
                        main,
                        request.amount,
                        TransactionKind::CashOut,
                        "cash-out approved",
                        Some(request.id),
                    )
                    .await?;
            }
        }

        request.status = RequestStatus::Approved;
        request.reviewed_by = Some(ctx.user_id);
        request.reviewed_at = Some(Utc::now());
        info!(request_id = %id, admin_id = ctx.user_id, "cash request approved");
        self.feed.publish(LedgerEvent::RequestDecided {
            request_id: id,
            user_id: request.user_id,
            status: RequestStatus::Approved,
        });
        Ok(())
    }

    /// Reject. Valid from any non-terminal state; no balance effect.
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        id: Ulid,
        reason: impl Into<String>,
    ) -> Result<(), LedgerError> {
        ctx.require_admin()?;
        let row = self.row(id)?;
        let mut request = row.lock().await;

        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized);
        }
        request.status = RequestStatus::Rejected;
        request.rejection_reason = Some(reason.into());
        request.reviewed_by = Some(ctx.user_id);
        request.reviewed_at = Some(Utc::now());
        info!(request_id = %id, admin_id = ctx.user_id, "cash request rejected");
        self.feed.publish(LedgerEvent::RequestDecided {
            request_id: id,
            user_id: request.user_id,
            status: RequestStatus::Rejected,
        });
        Ok(())
    }

    /// Park for manual review. Valid from `pending` only.
    pub async fn hold(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        self.park(ctx, id, RequestStatus::OnHold).await
    }

    /// Flag for fraud review. Valid from `pending` only.
    pub async fn flag(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        self.park(ctx, id, RequestStatus::Flagged).await
    }

    /// Mark payout preparation in progress. Valid from `pending` only;
    /// a cash-out must pass the same gate as approval to leave `pending`.
    pub async fn mark_processing(&self, ctx: &RequestContext, id: Ulid) -> Result<(), LedgerError> {
        ctx.require_admin()?;
        let row = self.row(id)?;
        let mut request = row.lock().await;

        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized);
        }
        if request.status != RequestStatus::Pending {
            return Err(LedgerError::InvalidInput(
                "only a pending request can move to processing",
            ));
        }
        if request.direction == CashDirection::CashOut {
            self.check_cash_out_gate(&request).await?;
        }
        request.status = RequestStatus::Processing;
        Ok(())
    }

    /// Snapshot of one request row
    pub async fn get(&self, id: Ulid) -> Result<CashRequest, LedgerError> {
        let row = self.row(id)?;
        let request = row.lock().await;
        Ok(request.clone())
    }

    /// Requests belonging to one member, for the poll interface
    pub async fn list_for_user(&self, user_id: UserId) -> Vec<CashRequest> {
        let rows: Vec<RequestRow> = self.requests.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for row in rows {
            let request = row.lock().await;
            if request.user_id == user_id {
                out.push(request.clone());
            }
        }
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// Count of rows not yet terminal (admin dashboard aggregate)
    pub async fn open_count(&self) -> usize {
        let rows: Vec<RequestRow> = self.requests.iter().map(|e| e.value().clone()).collect();
        let mut count = 0;
        for row in rows {
            if !row.lock().await.status.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Total approved volume by direction (admin dashboard aggregate)
    pub async fn approved_volume(&self, direction: CashDirection) -> Credits {
        let rows: Vec<RequestRow> = self.requests.iter().map(|e| e.value().clone()).collect();
        let mut total: Credits = 0;
        for row in rows {
            let request = row.lock().await;
            if request.direction == direction && request.status == RequestStatus::Approved {
                total = total.saturating_add(request.amount);
            }
        }
        total
    }

    fn row(&self, id: Ulid) -> Result<RequestRow, LedgerError> {
        self.requests
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(LedgerError::NotFound("cash request"))
    }

    /// Preconditions for a cash-out to leave `pending`: pin verified, and
    /// no active loan held by the requester (collateral-adjacent funds
    /// stay put while a borrowing is open).
    async fn check_cash_out_gate(&self, request: &CashRequest) -> Result<(), LedgerError> {
        if !request.pin_verified {
            return Err(LedgerError::InvalidInput(
                "cash-out requires pin verification",
            ));
        }
        if self.loans.has_active_borrowing(request.user_id).await {
            return Err(LedgerError::InvalidInput(
                "active loan blocks cash-out",
            ));
        }
        Ok(())
    }

    async fn park(
        &self,
        ctx: &RequestContext,
        id: Ulid,
        target: RequestStatus,
    ) -> Result<(), LedgerError> {
        ctx.require_admin()?;
        let row = self.row(id)?;
        let mut request = row.lock().await;

        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized);
        }
        if request.status != RequestStatus::Pending {
            return Err(LedgerError::InvalidInput(
                "only a pending request can be parked",
            ));
        }
        request.status = target;
        info!(request_id = %id, admin_id = ctx.user_id, status = %target, "cash request parked");
        Ok(())
    }
}
