//! Admin wallet transitions

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::super::state::AppState;
use super::super::types::{ApiError, LimitRequest};
use super::request_id;
use crate::wallet::WalletStatusResult;

/// Freeze a wallet
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/freeze",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Wallet status", body = WalletStatusResult),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Admin"
)]
pub async fn freeze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WalletStatusResult>, ApiError> {
    let rid = request_id(&headers);
    Ok(Json(state.engine.freeze(&id, rid.as_deref()).await?))
}

/// Unfreeze a wallet
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/unfreeze",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Wallet status", body = WalletStatusResult),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Admin"
)]
pub async fn unfreeze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WalletStatusResult>, ApiError> {
    let rid = request_id(&headers);
    Ok(Json(state.engine.unfreeze(&id, rid.as_deref()).await?))
}

/// Close a wallet (balance must be zero)
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/close",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Wallet status", body = WalletStatusResult),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Admin"
)]
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WalletStatusResult>, ApiError> {
    let rid = request_id(&headers);
    Ok(Json(state.engine.close(&id, rid.as_deref()).await?))
}

/// Set or clear the daily withdrawal limit
#[utoipa::path(
    put,
    path = "/v1/wallet/{id}/limit",
    params(("id" = String, Path, description = "Wallet id")),
    request_body = LimitRequest,
    responses(
        (status = 200, description = "Wallet status", body = WalletStatusResult),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Admin"
)]
pub async fn set_limit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LimitRequest>,
) -> Result<Json<WalletStatusResult>, ApiError> {
    let rid = request_id(&headers);
    Ok(Json(
        state
            .engine
            .set_daily_withdrawal_limit(&id, body.limit, rid.as_deref())
            .await?,
    ))
}
