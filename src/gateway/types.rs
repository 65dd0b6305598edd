//! API request/response types and the error envelope
//!
//! All error responses share the `{statusCode, error, message, type?}`
//! envelope. Status mapping: validation 400, business rule 422, concurrency
//! conflict 409, rate limit 429, unexpected 500.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::WalletError;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// HTTP status code
    #[schema(example = 422)]
    pub status_code: u16,
    /// Canonical reason phrase
    #[schema(example = "Unprocessable Entity")]
    pub error: String,
    /// Human-readable description
    #[schema(example = "insufficient funds")]
    pub message: String,
    /// Machine-readable error kind, present for domain errors
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Unified handler error with automatic IntoResponse
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_type: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: None,
        }
    }

    /// 400 Bad Request
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 429 Too Many Requests
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, msg)
    }

    /// 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status_code: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.message.clone(),
            error_type: self.error_type.clone(),
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        let status = match &err {
            WalletError::Validation(_) | WalletError::SameWallet => StatusCode::BAD_REQUEST,

            WalletError::InvalidAmount
            | WalletError::WalletNotFound(_)
            | WalletError::InsufficientFunds
            | WalletError::WalletNotActive
            | WalletError::WalletClosed
            | WalletError::WithdrawalLimitExceeded
            | WalletError::CurrencyMismatch { .. }
            | WalletError::NonZeroBalance => StatusCode::UNPROCESSABLE_ENTITY,

            WalletError::ConcurrentRequest | WalletError::VersionConflict(_) => {
                StatusCode::CONFLICT
            }

            WalletError::IllegalTransition { .. }
            | WalletError::SagaNotFound(_)
            | WalletError::Database(_)
            | WalletError::Cache(_)
            | WalletError::Bus(_)
            | WalletError::Serialization(_)
            | WalletError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay out of responses.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "Request failed with internal error");
            "internal server error".to_string()
        } else {
            err.to_string()
        };

        Self {
            status,
            message,
            error_type: Some(err.kind().to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.envelope())).into_response()
    }
}

// === Request DTOs (already-validated structs are what the core sees) ===

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AmountRequest {
    /// Amount, strictly positive, at most 2 decimal places
    #[schema(example = 100.0)]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[schema(example = "bob")]
    pub to_wallet_id: String,
    #[schema(example = 50.0)]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitRequest {
    /// New daily withdrawal limit; null clears it
    pub limit: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
