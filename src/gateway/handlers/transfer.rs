//! Transfer handler

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::super::state::AppState;
use super::super::types::{ApiError, TransferRequest};
use super::request_id;
use crate::saga::TransferResult;

/// Transfer funds to another wallet
///
/// Runs as a persisted two-leg saga. On success the saga is COMPLETED; on
/// failure it is COMPENSATED or FAILED and the error is surfaced here.
#[utoipa::path(
    post,
    path = "/v1/wallet/{id}/transfer",
    params(
        ("id" = String, Path, description = "Source wallet id"),
        ("X-Request-ID" = Option<String>, Header, description = "Idempotency key")
    ),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Completed transfer", body = TransferResult),
        (status = 400, description = "Validation error"),
        (status = 409, description = "Concurrent request"),
        (status = 422, description = "Business rule violation")
    ),
    tag = "Transfer"
)]
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TransferResult>, ApiError> {
    if body.to_wallet_id.trim().is_empty() {
        return Err(ApiError::validation("toWalletId must not be empty"));
    }
    if body.amount <= rust_decimal::Decimal::ZERO {
        return Err(ApiError::validation("amount must be positive"));
    }

    let rid = request_id(&headers);
    let result = state
        .saga
        .execute_transfer(&id, &body.to_wallet_id, body.amount, rid.as_deref())
        .await?;
    Ok(Json(result))
}
