//! Gateway handlers
//!
//! Thin HTTP adapters over the ledger core: decode the request, hand the
//! caller context through, translate `LedgerError` into the unified
//! envelope. No business rule lives here.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use cached::proc_macro::cached;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::state::AppState;
use super::types::{ApiError, ApiResult, ok};
use crate::context::RequestContext;
use crate::core_types::{Credits, ESCROW_USER, RateScaled};
use crate::fees::RATE_PRECISION;
use crate::ledger::LedgerEntry;
use crate::loans::{Loan, LoanStatus, SweepReport};
use crate::requests::{CashRequest, CreateCashRequest};
use crate::wallet::{WalletSnapshot, WalletType};

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request("invalid id format"))
}

// ============================================================================
// Wallets
// ============================================================================

/// GET /api/v1/balances - the caller's wallet snapshot (poll interface)
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<WalletSnapshot> {
    ok(state.store.balances(ctx.user_id).await)
}

/// GET /api/v1/ledger - the caller's audit history, oldest first
pub async fn get_ledger_history(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Vec<LedgerEntry>> {
    ok(state.ledger.entries_for(ctx.user_id))
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub from: WalletType,
    pub to: WalletType,
    pub amount: Credits,
}

/// POST /api/v1/transfer - internal move between the caller's own wallets
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<TransferBody>,
) -> ApiResult<WalletSnapshot> {
    state
        .coordinator
        .transfer(ctx.user_id, body.from, body.to, body.amount)
        .await?;
    ok(state.store.balances(ctx.user_id).await)
}

// ============================================================================
// Cash requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

/// POST /api/v1/requests - create a cash-in/cash-out request (pending)
pub async fn create_cash_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateCashRequest>,
) -> ApiResult<CreatedResponse> {
    let id = state.requests.create(&ctx, body)?;
    ok(CreatedResponse { id: id.to_string() })
}

/// GET /api/v1/requests - the caller's requests (poll interface)
pub async fn list_cash_requests(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Vec<CashRequest>> {
    ok(state.requests.list_for_user(ctx.user_id).await)
}

/// GET /api/v1/requests/{id}
pub async fn get_cash_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<CashRequest> {
    let request = state.requests.get(parse_id(&id)?).await?;
    if !ctx.is_admin && request.user_id != ctx.user_id {
        return ApiError::from(crate::error::LedgerError::Unauthorized).into_err();
    }
    ok(request)
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Hold,
    Flag,
    Processing,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: Decision,
    pub reason: Option<String>,
}

/// POST /api/v1/requests/{id}/decision - admin review transition
pub async fn decide_cash_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<CashRequest> {
    let id = parse_id(&id)?;
    match body.decision {
        Decision::Approve => state.requests.approve(&ctx, id).await?,
        Decision::Reject => {
            let reason = body.reason.unwrap_or_default();
            state.requests.reject(&ctx, id, reason).await?;
        }
        Decision::Hold => state.requests.hold(&ctx, id).await?,
        Decision::Flag => state.requests.flag(&ctx, id).await?,
        Decision::Processing => state.requests.mark_processing(&ctx, id).await?,
    }
    ok(state.requests.get(id).await?)
}

// ============================================================================
// Loans
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OfferLoanBody {
    pub principal: Credits,
    /// Fractional rate, e.g. 0.03 for 3%
    pub interest_rate: f64,
    pub term_days: u32,
}

fn scale_rate(rate: f64) -> Result<RateScaled, ApiError> {
    if !rate.is_finite() || rate < 0.0 || rate > 10.0 {
        return Err(ApiError::bad_request("interest rate out of range"));
    }
    Ok((rate * RATE_PRECISION as f64).round() as RateScaled)
}

/// POST /api/v1/loans - post an offer (principal escrowed)
pub async fn offer_loan(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<OfferLoanBody>,
) -> ApiResult<CreatedResponse> {
    let rate = scale_rate(body.interest_rate)?;
    let id = state
        .loans
        .offer(&ctx, body.principal, rate, body.term_days)
        .await?;
    ok(CreatedResponse { id: id.to_string() })
}

/// GET /api/v1/loans - open offers a borrower could accept
pub async fn list_open_loans(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Loan>> {
    ok(state.loans.open_offers().await)
}

/// GET /api/v1/loans/{id}
pub async fn get_loan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Loan> {
    ok(state.loans.get(parse_id(&id)?).await?)
}

/// POST /api/v1/loans/{id}/accept
pub async fn accept_loan(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Loan> {
    let id = parse_id(&id)?;
    state.loans.accept(&ctx, id).await?;
    ok(state.loans.get(id).await?)
}

/// POST /api/v1/loans/{id}/repay
pub async fn repay_loan(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Loan> {
    let id = parse_id(&id)?;
    state.loans.repay(&ctx, id).await?;
    ok(state.loans.get(id).await?)
}

/// POST /api/v1/loans/{id}/cancel
pub async fn cancel_loan(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Loan> {
    let id = parse_id(&id)?;
    state.loans.cancel(&ctx, id).await?;
    ok(state.loans.get(id).await?)
}

// ============================================================================
// Admin
// ============================================================================

/// POST /api/v1/admin/sweep - resolve all loans past their due date
pub async fn sweep_loans(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<SweepReport> {
    ctx.require_admin().map_err(ApiError::from)?;
    ok(state.loans.sweep_expired().await)
}

/// Admin dashboard aggregates
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub total_supply: Credits,
    pub wallet_count: usize,
    pub escrow_balance: Credits,
    pub open_requests: usize,
    pub open_loan_offers: usize,
    pub active_loans: usize,
}

/// Aggregates are expensive to fold and polled on a 30-60s cadence, so
/// one computation serves every poller inside the TTL.
#[cached(time = 30, key = "u8", convert = r#"{ 0 }"#)]
async fn compute_platform_stats(state: Arc<AppState>) -> PlatformStats {
    PlatformStats {
        total_supply: state.store.total_supply().await,
        wallet_count: state.store.wallet_count(),
        escrow_balance: state.store.balances(ESCROW_USER).await.main,
        open_requests: state.requests.open_count().await,
        open_loan_offers: state.loans.count_by_status(LoanStatus::Pending).await,
        active_loans: state.loans.count_by_status(LoanStatus::Active).await,
    }
}

/// GET /api/v1/admin/stats
pub async fn platform_stats(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<PlatformStats> {
    ctx.require_admin().map_err(ApiError::from)?;
    ok(compute_platform_stats(state).await)
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - liveness probe, no auth
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
