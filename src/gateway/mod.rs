//! HTTP gateway
//!
//! Thin shell over the engines: request validation, the error envelope, and
//! health probes. The core only ever sees already-validated input.

pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub use state::AppState;

/// OpenAPI 3.0 documentation, served at `/docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Service API",
        version = "1.0.0",
        description = "Per-account balances with event journaling, saga-based transfers, and at-least-once event delivery."
    ),
    paths(
        handlers::wallet::deposit,
        handlers::wallet::withdraw,
        handlers::wallet::get_balance,
        handlers::wallet::get_history,
        handlers::transfer::transfer,
        handlers::admin::freeze,
        handlers::admin::unfreeze,
        handlers::admin::close,
        handlers::admin::set_limit,
        handlers::health::health,
        handlers::health::live,
        handlers::health::ready,
    ),
    components(schemas(
        types::ErrorEnvelope,
        types::AmountRequest,
        types::TransferRequest,
        types::LimitRequest,
        crate::wallet::BalanceResult,
        crate::wallet::WalletStatusResult,
        crate::wallet::model::WalletEvent,
        crate::saga::TransferResult,
        handlers::health::HealthResponse,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/wallet/{id}/deposit", post(handlers::wallet::deposit))
        .route("/v1/wallet/{id}/withdraw", post(handlers::wallet::withdraw))
        .route("/v1/wallet/{id}/transfer", post(handlers::transfer::transfer))
        .route("/v1/wallet/{id}", get(handlers::wallet::get_balance))
        .route("/v1/wallet/{id}/history", get(handlers::wallet::get_history))
        .route("/v1/wallet/{id}/freeze", post(handlers::admin::freeze))
        .route("/v1/wallet/{id}/unfreeze", post(handlers::admin::unfreeze))
        .route("/v1/wallet/{id}/close", post(handlers::admin::close))
        .route("/v1/wallet/{id}/limit", put(handlers::admin::set_limit))
        .route("/health", get(handlers::health::health))
        .route("/health/live", get(handlers::health::live))
        .route("/health/ready", get(handlers::health::ready))
        .route("/docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::bus::{EventPublisher, MemoryBus};
    use crate::cache::{CacheStore, MemoryCache};
    use crate::coordinator::TxCoordinator;
    use crate::db::Database;
    use crate::retry::RetryPolicy;
    use crate::saga::TransferSagaEngine;
    use crate::wallet::{EngineSettings, WalletEngine};

    /// Router over a lazy pool: routes that never touch the store are
    /// exercisable without infrastructure.
    fn test_router() -> Router {
        let pool = sqlx::PgPool::connect_lazy("postgres://nobody@127.0.0.1:1/nothing").unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let bus: Arc<dyn EventPublisher> = Arc::new(MemoryBus::new());
        let coordinator = Arc::new(TxCoordinator::new(pool.clone(), cache.clone(), bus));
        let retry = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let engine = Arc::new(WalletEngine::new(
            coordinator.clone(),
            pool.clone(),
            cache.clone(),
            retry.clone(),
            EngineSettings::default(),
        ));
        let saga = Arc::new(TransferSagaEngine::new(coordinator, pool.clone(), cache, retry));
        let db = Arc::new(Database::from_pool(pool));
        router(Arc::new(AppState::new(engine, saga, db)))
    }

    #[tokio::test]
    async fn test_liveness_needs_no_store() {
        let response = test_router()
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validation_rejected_before_the_store() {
        let response = test_router()
            .oneshot(
                Request::post("/v1/wallet/alice/deposit")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"amount": -5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["statusCode"], 400);
        assert_eq!(envelope["error"], "Bad Request");
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let response = test_router()
            .oneshot(Request::get("/docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["info"]["title"], "Wallet Service API");
        assert!(doc["paths"]["/v1/wallet/{id}/deposit"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = test_router()
            .oneshot(Request::get("/v2/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
