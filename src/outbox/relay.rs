//! Outbox relay worker
//!
//! Drains unpublished outbox rows to the event bus and marks the successes
//! published in one batch update. A failed row does not block the rest of
//! the batch; it is retried on a later tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::OutboxRepository;
use crate::bus::{routing_key, EventPublisher};
use crate::error::WalletError;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

pub struct OutboxRelay {
    pool: PgPool,
    bus: Arc<dyn EventPublisher>,
    config: RelayConfig,
    tick_running: AtomicBool,
}

impl OutboxRelay {
    pub fn new(pool: PgPool, bus: Arc<dyn EventPublisher>, config: RelayConfig) -> Self {
        Self {
            pool,
            bus,
            config,
            tick_running: AtomicBool::new(false),
        }
    }

    /// Run the relay loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting outbox relay"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("Outbox relay shutting down");
                    return;
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Outbox relay tick failed");
            }
        }
    }

    /// Drain one batch, skipping when the previous tick is still running.
    /// Returns the number of rows published.
    pub async fn tick(&self) -> Result<usize, WalletError> {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            debug!("Previous relay tick still running; skipping");
            return Ok(0);
        }
        let result = self.drain_batch().await;
        self.tick_running.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_batch(&self) -> Result<usize, WalletError> {
        let rows = OutboxRepository::fetch_unpublished(&self.pool, self.config.batch_size).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut published: Vec<Uuid> = Vec::with_capacity(rows.len());
        for row in &rows {
            let key = routing_key(&row.event_type);
            let payload = match serde_json::to_vec(&row.payload) {
                Ok(p) => p,
                Err(e) => {
                    error!(outbox_id = %row.id, error = %e, "Unserializable outbox payload; skipping row");
                    continue;
                }
            };
            match self.bus.publish(&key, &payload).await {
                Ok(()) => published.push(row.id),
                Err(e) => {
                    warn!(
                        outbox_id = %row.id,
                        routing_key = %key,
                        error = %e,
                        "Outbox publish failed; will retry next tick"
                    );
                }
            }
        }

        if !published.is_empty() {
            OutboxRepository::mark_published(&self.pool, &published).await?;
            debug!(count = published.len(), "Outbox rows published");
        }

        Ok(published.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
    }
}
