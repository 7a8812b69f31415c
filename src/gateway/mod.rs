//! HTTP gateway
//!
//! Exposes the ledger core to collaborators. Identity is issued upstream:
//! the gateway trusts the identity proxy's `x-user-id` / `x-admin`
//! headers and turns them into the request-scoped [`RequestContext`]
//! every handler passes down.

pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{Next, from_fn},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::context::RequestContext;
use state::AppState;
use types::ApiError;

/// Axum middleware: build the caller context from the trusted identity
/// headers set by the upstream session proxy.
async fn identity_middleware(mut request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let headers = request.headers();

    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-id header"))?;

    let is_admin = headers
        .get("x-admin")
        .and_then(|value| value.to_str().ok())
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let ctx = RequestContext { user_id, is_admin };
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/balances", get(handlers::get_balances))
        .route("/ledger", get(handlers::get_ledger_history))
        .route("/transfer", post(handlers::create_transfer))
        .route(
            "/requests",
            get(handlers::list_cash_requests).post(handlers::create_cash_request),
        )
        .route("/requests/{id}", get(handlers::get_cash_request))
        .route("/requests/{id}/decision", post(handlers::decide_cash_request))
        .route(
            "/loans",
            get(handlers::list_open_loans).post(handlers::offer_loan),
        )
        .route("/loans/{id}", get(handlers::get_loan))
        .route("/loans/{id}/accept", post(handlers::accept_loan))
        .route("/loans/{id}/repay", post(handlers::repay_loan))
        .route("/loans/{id}/cancel", post(handlers::cancel_loan))
        .route("/admin/sweep", post(handlers::sweep_loans))
        .route("/admin/stats", get(handlers::platform_stats))
        .layer(from_fn(identity_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: &GatewayConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
