//! Wallet operation handlers

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;

use super::super::state::AppState;
use super::super::types::{AmountRequest, ApiError, HistoryQuery};
use super::request_id;
use crate::wallet::model::WalletEvent;
use crate::wallet::BalanceResult;

/// Deposit funds
///
/// Auto-provisions the wallet on first deposit. Supply `X-Request-ID` for
/// exactly-once semantics under client retries.
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/deposit",
    params(
        ("id" = String, Path, description = "Wallet id"),
        ("X-Request-ID" = Option<String>, Header, description = "Idempotency key")
    ),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "New balance", body = BalanceResult),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Concurrent request"),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Wallet"
)]
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AmountRequest>,
) -> Result<Json<BalanceResult>, ApiError> {
    if body.amount <= rust_decimal::Decimal::ZERO {
        return Err(ApiError::validation("amount must be positive"));
    }
    let rid = request_id(&headers);
    let result = state.engine.deposit(&id, body.amount, rid.as_deref()).await?;
    Ok(Json(result))
}

/// Withdraw funds
///
/// The wallet must exist and be ACTIVE; daily withdrawal limits apply.
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/withdraw",
    params(
        ("id" = String, Path, description = "Wallet id"),
        ("X-Request-ID" = Option<String>, Header, description = "Idempotency key")
    ),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "New balance", body = BalanceResult),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Concurrent request"),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Wallet"
)]
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AmountRequest>,
) -> Result<Json<BalanceResult>, ApiError> {
    if body.amount <= rust_decimal::Decimal::ZERO {
        return Err(ApiError::validation("amount must be positive"));
    }
    let rid = request_id(&headers);
    let result = state
        .engine
        .withdraw(&id, body.amount, rid.as_deref())
        .await?;
    Ok(Json(result))
}

/// Get balance
///
/// Read-through cached (30s TTL). Unknown wallets read as zero.
#[utoipa::path(
    get,
    path = "/v1/wallet/{id}",
    params(("id" = String, Path, description = "Wallet id")),
    responses((status = 200, description = "Current balance", body = BalanceResult)),
    tag = "Wallet"
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResult>, ApiError> {
    Ok(Json(state.engine.get_balance(&id).await?))
}

/// Event history, newest first
#[utoipa::path(
    get,
    path = "/v1/wallet/{id}/history",
    params(
        ("id" = String, Path, description = "Wallet id"),
        ("limit" = Option<i64>, Query, description = "Page size, capped at 100"),
        ("offset" = Option<i64>, Query, description = "Page offset")
    ),
    responses((status = 200, description = "Events", body = [WalletEvent])),
    tag = "Wallet"
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<WalletEvent>>, ApiError> {
    let events = state
        .engine
        .get_history(&id, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(events))
}
