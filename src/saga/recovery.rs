//! Saga recovery worker
//!
//! Background loop that advances sagas stranded in DEBITED past the stuck
//! threshold. An in-process flag prevents overlapping ticks within one
//! replica; across replicas the per-saga state checks make overlapping work
//! benign.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::engine::TransferSagaEngine;
use super::model::SagaRepository;
use crate::error::WalletError;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to scan for stuck sagas
    pub scan_interval: Duration,
    /// How long a saga must sit in DEBITED to be considered stuck
    pub stuck_threshold: Duration,
    /// Maximum sagas to process per scan
    pub batch_size: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            stuck_threshold: Duration::from_secs(60),
            batch_size: 10,
        }
    }
}

pub struct SagaRecoveryWorker {
    engine: Arc<TransferSagaEngine>,
    pool: sqlx::PgPool,
    config: RecoveryConfig,
    tick_running: AtomicBool,
}

impl SagaRecoveryWorker {
    pub fn new(engine: Arc<TransferSagaEngine>, pool: sqlx::PgPool, config: RecoveryConfig) -> Self {
        Self {
            engine,
            pool,
            config,
            tick_running: AtomicBool::new(false),
        }
    }

    /// Run the recovery loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stuck_threshold_secs = self.config.stuck_threshold.as_secs(),
            "Starting saga recovery worker"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                _ = shutdown.changed() => {
                    info!("Saga recovery worker shutting down");
                    return;
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Recovery scan failed");
            }
        }
    }

    /// Run a single scan, skipping when the previous tick is still running.
    pub async fn tick(&self) -> Result<usize, WalletError> {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("Previous recovery tick still running; skipping");
            return Ok(0);
        }
        let result = self.scan_and_recover().await;
        self.tick_running.store(false, Ordering::SeqCst);
        result
    }

    async fn scan_and_recover(&self) -> Result<usize, WalletError> {
        let stuck = SagaRepository::find_stuck(
            &self.pool,
            self.config.stuck_threshold,
            self.config.batch_size,
        )
        .await?;

        if stuck.is_empty() {
            debug!("No stuck sagas found");
            return Ok(0);
        }

        info!(count = stuck.len(), "Found stuck sagas to recover");

        let mut recovered = 0;
        for saga in &stuck {
            match self.engine.recover_saga(saga.id).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    error!(saga_id = %saga.id, error = %e, "Failed to recover saga");
                }
            }
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_config_default() {
        let config = RecoveryConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(10));
        assert_eq!(config.stuck_threshold, Duration::from_secs(60));
        assert_eq!(config.batch_size, 10);
    }
}
