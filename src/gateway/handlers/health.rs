//! Health probe handlers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use utoipa::ToSchema;

use super::super::state::AppState;

#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1767225600000_u64)]
    pub timestamp_ms: u64,
    pub status: &'static str,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Overall health
///
/// Pings the store at most once per interval; within the interval the last
/// verdict is reused.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
    static LAST_HEALTHY: AtomicU64 = AtomicU64::new(1);
    const CHECK_INTERVAL_MS: u64 = 5000;

    let now = now_ms();
    let last_check = LAST_CHECK_MS.load(Ordering::Relaxed);

    let healthy = if now.saturating_sub(last_check) > CHECK_INTERVAL_MS {
        LAST_CHECK_MS.store(now, Ordering::Relaxed);
        let ok = match state.db.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Store ping failed");
                false
            }
        };
        LAST_HEALTHY.store(ok as u64, Ordering::Relaxed);
        ok
    } else {
        LAST_HEALTHY.load(Ordering::Relaxed) == 1
    };

    if healthy {
        (
            StatusCode::OK,
            Json(HealthResponse {
                timestamp_ms: now,
                status: "ok",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                timestamp_ms: now,
                status: "unavailable",
            }),
        )
    }
}

/// Liveness: the process is up
#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process alive", body = HealthResponse)),
    tag = "System"
)]
pub async fn live() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            timestamp_ms: now_ms(),
            status: "ok",
        }),
    )
}

/// Readiness: the store is reachable
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready", body = HealthResponse),
        (status = 503, description = "Store unreachable")
    ),
    tag = "System"
)]
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                timestamp_ms: now_ms(),
                status: "ok",
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Readiness store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    timestamp_ms: now_ms(),
                    status: "unavailable",
                }),
            )
        }
    }
}
