//! walletd daemon: wires the store, cache, bus, engines, background
//! workers, and the HTTP gateway; shuts the lot down on SIGINT.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use walletd::bus::{AmqpBus, EventPublisher, MemoryBus};
use walletd::cache::{CacheStore, MemoryCache, RedisCache};
use walletd::config::AppConfig;
use walletd::coordinator::TxCoordinator;
use walletd::db::Database;
use walletd::fraud::{FraudConsumer, FraudProcessor, FraudTopology};
use walletd::gateway::{self, AppState};
use walletd::outbox::{OutboxRelay, RelayConfig};
use walletd::retry::RetryPolicy;
use walletd::saga::{RecoveryConfig, SagaRecoveryWorker, TransferSagaEngine};
use walletd::wallet::repository::IdempotencyRepository;
use walletd::wallet::{EngineSettings, WalletEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("WALLETD_ENV").unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = walletd::logging::init_logging(&config);

    info!(env = %env, git = env!("GIT_HASH"), "Starting walletd");

    // === Store ===
    let db = Arc::new(
        Database::connect(&config.postgres_url)
            .await
            .context("Failed to connect to PostgreSQL")?,
    );
    if config.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }

    // === Cache / lock service ===
    let cache: Arc<dyn CacheStore> = if config.redis_url.is_empty() {
        warn!("No redis_url configured; using in-process cache (single replica only)");
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(
            RedisCache::connect(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        )
    };

    // === Event bus ===
    let amqp: Option<Arc<AmqpBus>> = if config.amqp_url.is_empty() {
        None
    } else {
        Some(Arc::new(
            AmqpBus::connect(&config.amqp_url, &config.bus.exchange)
                .await
                .context("Failed to connect to the broker")?,
        ))
    };
    let bus: Arc<dyn EventPublisher> = match &amqp {
        Some(b) => b.clone(),
        None => {
            warn!("No amqp_url configured; events stay in the outbox undrained");
            Arc::new(MemoryBus::new())
        }
    };

    // === Engines ===
    let coordinator = Arc::new(TxCoordinator::new(
        db.pool().clone(),
        cache.clone(),
        bus.clone(),
    ));
    let retry = RetryPolicy::from(&config.retry);

    let engine = Arc::new(WalletEngine::new(
        coordinator.clone(),
        db.pool().clone(),
        cache.clone(),
        retry.clone(),
        EngineSettings {
            default_currency: config.wallet.default_currency.clone(),
            balance_cache_ttl: Duration::from_secs(config.wallet.balance_cache_ttl_secs),
        },
    ));
    let saga_engine = Arc::new(TransferSagaEngine::new(
        coordinator.clone(),
        db.pool().clone(),
        cache.clone(),
        retry.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // === Background workers ===
    let relay = Arc::new(OutboxRelay::new(
        db.pool().clone(),
        bus.clone(),
        RelayConfig {
            poll_interval: Duration::from_secs(config.outbox.relay_interval_secs),
            batch_size: config.outbox.relay_batch_size,
        },
    ));
    tokio::spawn({
        let relay = relay.clone();
        let rx = shutdown_rx.clone();
        async move { relay.run(rx).await }
    });

    let recovery = Arc::new(SagaRecoveryWorker::new(
        saga_engine.clone(),
        db.pool().clone(),
        RecoveryConfig {
            scan_interval: Duration::from_secs(config.saga.recovery_interval_secs),
            stuck_threshold: config.saga.stuck_threshold(),
            batch_size: config.saga.recovery_batch_size,
        },
    ));
    tokio::spawn({
        let recovery = recovery.clone();
        let rx = shutdown_rx.clone();
        async move { recovery.run(rx).await }
    });

    // Hourly GC for idempotency records past their retention window.
    tokio::spawn({
        let pool = db.pool().clone();
        let ttl_secs = config.wallet.idempotency_ttl_secs;
        let mut rx = shutdown_rx.clone();
        async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    _ = rx.changed() => return,
                }
                let cutoff = Utc::now() - chrono::Duration::seconds(ttl_secs as i64);
                match IdempotencyRepository::purge_expired(&pool, cutoff).await {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "Purged expired idempotency records"),
                    Err(e) => warn!(error = %e, "Idempotency GC failed"),
                }
            }
        }
    });

    if let Some(b) = &amqp {
        let processor = Arc::new(FraudProcessor::new(
            db.pool().clone(),
            cache.clone(),
            config.fraud.clone(),
        ));
        let topology = FraudTopology::new(
            &config.bus.exchange,
            &config.bus.fraud_queue,
            config.fraud.retry_delays_ms.clone(),
        );
        let consumer = FraudConsumer::new(b.clone(), processor, topology);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(rx).await });
    }

    // === Gateway ===
    let app_state = Arc::new(AppState::new(engine, saga_engine, db.clone()));
    let app = gateway::router(app_state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;

    // Stop workers, drain the publish channel, close the broker connection.
    let _ = shutdown_tx.send(true);
    if let Some(b) = amqp {
        b.close().await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
