//! Fraud rule evaluation
//!
//! Per-message handling: parse, dedupe by content hash, apply rules, decide
//! ack / delayed retry / dead-letter. Alert writes go to the store; dedupe
//! markers and sliding windows live in the cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::{FraudAlertRepository, FraudAlertType};
use crate::bus::EventMessage;
use crate::cache::{self, CacheStore};
use crate::config::FraudConfig;
use crate::error::WalletError;
use crate::wallet::model::WalletEventType;

/// TTL for processed-event dedupe markers.
const PROCESSED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What the consumer should do with the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed (or duplicate); acknowledge.
    Ack,
    /// Transient failure; requeue through the wait queue for this attempt.
    Retry { attempt: u32 },
    /// Unparseable or retries exhausted; route to the DLQ.
    DeadLetter,
}

pub struct FraudProcessor {
    pool: PgPool,
    cache: Arc<dyn CacheStore>,
    config: FraudConfig,
}

impl FraudProcessor {
    pub fn new(pool: PgPool, cache: Arc<dyn CacheStore>, config: FraudConfig) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    /// Handle one delivery. `retry_count` comes from the x-retry-count
    /// header (0 on first delivery).
    pub async fn handle(&self, payload: &[u8], retry_count: u32) -> Outcome {
        let message: EventMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Unparseable fraud message; dead-lettering");
                return Outcome::DeadLetter;
            }
        };

        match self.process(&message).await {
            Ok(()) => Outcome::Ack,
            Err(e) if retry_count < self.config.max_retries => {
                warn!(
                    wallet_id = %message.wallet_id,
                    retry_count = retry_count,
                    error = %e,
                    "Fraud processing failed; scheduling retry"
                );
                Outcome::Retry {
                    attempt: retry_count,
                }
            }
            Err(e) => {
                warn!(
                    wallet_id = %message.wallet_id,
                    error = %e,
                    "Fraud processing retries exhausted; dead-lettering"
                );
                Outcome::DeadLetter
            }
        }
    }

    async fn process(&self, message: &EventMessage) -> Result<(), WalletError> {
        let key = cache::processed_event_key(&idempotency_key(message));
        let marked = match self.cache.set_if_absent(&key, "1", PROCESSED_TTL).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(wallet_id = %message.wallet_id, "Duplicate event; already processed");
                return Ok(());
            }
            Err(e) => {
                // Losing dedupe only risks a duplicate alert; proceed.
                warn!(error = %e, "Processed-event marker unavailable; continuing without dedupe");
                false
            }
        };

        let result = self.apply_rules(message).await;
        if result.is_err() && marked {
            // Clear the marker so the delayed retry is not swallowed as a
            // duplicate.
            if let Err(e) = self.cache.delete(&key).await {
                warn!(error = %e, "Failed to clear processed-event marker");
            }
        }
        result
    }

    async fn apply_rules(&self, message: &EventMessage) -> Result<(), WalletError> {
        if message.event_type == WalletEventType::FundsWithdrawn.as_str() {
            self.check_high_value(message).await?;
            self.check_rapid_withdrawals(message).await?;
        }
        Ok(())
    }

    async fn check_high_value(&self, message: &EventMessage) -> Result<(), WalletError> {
        let amount = match message.amount {
            Some(a) => a,
            None => return Ok(()),
        };
        if amount <= self.config.threshold {
            return Ok(());
        }

        FraudAlertRepository::insert(
            &self.pool,
            &message.wallet_id,
            FraudAlertType::HighValueTransaction,
            json!({ "amount": amount, "threshold": self.config.threshold }),
        )
        .await?;

        info!(
            wallet_id = %message.wallet_id,
            amount = %amount,
            "HIGH_VALUE_TRANSACTION alert raised"
        );
        Ok(())
    }

    async fn check_rapid_withdrawals(&self, message: &EventMessage) -> Result<(), WalletError> {
        let window = Duration::from_secs(self.config.time_window_minutes * 60);
        let key = cache::withdrawals_key(&message.wallet_id);
        let event_ms = message.timestamp.timestamp_millis();
        let now_ms = Utc::now().timestamp_millis();

        let map_cache = |e: crate::cache::CacheError| WalletError::Cache(e.to_string());

        self.cache
            .sorted_add(&key, &event_ms.to_string(), event_ms as f64)
            .await
            .map_err(map_cache)?;
        self.cache
            .sorted_trim_below(&key, (now_ms - window.as_millis() as i64) as f64)
            .await
            .map_err(map_cache)?;
        self.cache.expire(&key, window).await.map_err(map_cache)?;

        let count = self.cache.sorted_count(&key).await.map_err(map_cache)?;
        if count <= self.config.max_withdrawals {
            return Ok(());
        }

        FraudAlertRepository::insert(
            &self.pool,
            &message.wallet_id,
            FraudAlertType::RapidWithdrawals,
            json!({
                "withdrawalCount": count,
                "timeWindow": format!("{} minutes", self.config.time_window_minutes),
            }),
        )
        .await?;

        info!(
            wallet_id = %message.wallet_id,
            count = count,
            "RAPID_WITHDRAWALS alert raised"
        );
        Ok(())
    }
}

/// Content hash identifying one logical event across redeliveries:
/// SHA-256 of `walletId|eventType|timestamp|amount?`, hex-encoded.
pub fn idempotency_key(message: &EventMessage) -> String {
    let mut input = format!(
        "{}|{}|{}",
        message.wallet_id,
        message.event_type,
        message.timestamp.to_rfc3339()
    );
    if let Some(amount) = message.amount {
        input.push('|');
        input.push_str(&amount.to_string());
    }

    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(event_type: &str, amount: Option<&str>, ts: &str) -> EventMessage {
        EventMessage {
            event_type: event_type.to_string(),
            wallet_id: "alice".to_string(),
            amount: amount.map(|a| a.parse().unwrap()),
            metadata: json!({}),
            timestamp: ts.parse().unwrap(),
        }
    }

    #[test]
    fn test_idempotency_key_stable_across_redelivery() {
        let a = message("FUNDS_WITHDRAWN", Some("20000.00"), "2026-01-15T12:00:00Z");
        let b = message("FUNDS_WITHDRAWN", Some("20000.00"), "2026-01-15T12:00:00Z");
        assert_eq!(idempotency_key(&a), idempotency_key(&b));
        assert_eq!(idempotency_key(&a).len(), 64);
    }

    #[test]
    fn test_idempotency_key_distinguishes_events() {
        let base = message("FUNDS_WITHDRAWN", Some("100.00"), "2026-01-15T12:00:00Z");

        let other_amount = message("FUNDS_WITHDRAWN", Some("100.01"), "2026-01-15T12:00:00Z");
        assert_ne!(idempotency_key(&base), idempotency_key(&other_amount));

        let other_time = message("FUNDS_WITHDRAWN", Some("100.00"), "2026-01-15T12:00:01Z");
        assert_ne!(idempotency_key(&base), idempotency_key(&other_time));

        let no_amount = message("FUNDS_WITHDRAWN", None, "2026-01-15T12:00:00Z");
        assert_ne!(idempotency_key(&base), idempotency_key(&no_amount));
    }
}
