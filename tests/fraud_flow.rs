//! Fraud processor scenarios: rule evaluation, content-hash dedupe, and
//! retry/dead-letter decisions. Rules that write alerts need PostgreSQL and
//! skip without it; the decision paths run against an unreachable pool.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{dec, harness, wallet_id};
use walletd::bus::EventMessage;
use walletd::cache::MemoryCache;
use walletd::config::FraudConfig;
use walletd::fraud::{FraudAlertRepository, FraudProcessor, Outcome};

fn withdrawal(wallet_id: &str, amount: &str, timestamp: chrono::DateTime<Utc>) -> Vec<u8> {
    serde_json::to_vec(&EventMessage {
        event_type: "FUNDS_WITHDRAWN".to_string(),
        wallet_id: wallet_id.to_string(),
        amount: Some(amount.parse().unwrap()),
        metadata: json!({}),
        timestamp,
    })
    .unwrap()
}

/// Pool pointing nowhere: alert writes fail, decision paths still run.
fn unreachable_pool() -> sqlx::PgPool {
    sqlx::PgPool::connect_lazy("postgres://nobody@127.0.0.1:1/nothing").unwrap()
}

#[tokio::test]
async fn test_unparseable_message_dead_letters() {
    let processor = FraudProcessor::new(
        unreachable_pool(),
        Arc::new(MemoryCache::new()),
        FraudConfig::default(),
    );

    assert_eq!(processor.handle(b"not json", 0).await, Outcome::DeadLetter);
}

#[tokio::test]
async fn test_store_failure_retries_then_dead_letters() {
    let processor = FraudProcessor::new(
        unreachable_pool(),
        Arc::new(MemoryCache::new()),
        FraudConfig::default(),
    );

    // high-value alert insert fails against the unreachable store
    let payload = withdrawal("w1", "20000.00", Utc::now());
    assert_eq!(
        processor.handle(&payload, 0).await,
        Outcome::Retry { attempt: 0 }
    );
    assert_eq!(
        processor.handle(&payload, 2).await,
        Outcome::Retry { attempt: 2 }
    );
    assert_eq!(processor.handle(&payload, 3).await, Outcome::DeadLetter);
}

#[tokio::test]
async fn test_below_threshold_needs_no_store() {
    let processor = FraudProcessor::new(
        unreachable_pool(),
        Arc::new(MemoryCache::new()),
        FraudConfig::default(),
    );

    // under both rule thresholds: no alert write, acks cleanly
    let payload = withdrawal("w1", "100.00", Utc::now());
    assert_eq!(processor.handle(&payload, 0).await, Outcome::Ack);
}

#[tokio::test]
async fn test_high_value_alert_written_once() {
    let h = match harness().await {
        Some(h) => h,
        None => {
            eprintln!("Skipping test - database not available");
            return;
        }
    };
    let wallet = wallet_id("fraud");
    let processor = FraudProcessor::new(
        h.pool.clone(),
        h.cache.clone(),
        FraudConfig::default(),
    );

    let payload = withdrawal(&wallet, "20000.00", Utc::now());
    assert_eq!(processor.handle(&payload, 0).await, Outcome::Ack);

    let alerts = FraudAlertRepository::list_for_wallet(&h.pool, &wallet).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "HIGH_VALUE_TRANSACTION");
    assert_eq!(alerts[0].details["threshold"], json!(dec("10000")));

    // redelivery of the identical payload is deduped by content hash
    assert_eq!(processor.handle(&payload, 0).await, Outcome::Ack);
    let alerts = FraudAlertRepository::list_for_wallet(&h.pool, &wallet).await.unwrap();
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn test_rapid_withdrawals_alert() {
    let h = match harness().await {
        Some(h) => h,
        None => {
            eprintln!("Skipping test - database not available");
            return;
        }
    };
    let wallet = wallet_id("fraud");
    let processor = FraudProcessor::new(
        h.pool.clone(),
        h.cache.clone(),
        FraudConfig::default(),
    );

    // four sub-threshold withdrawals inside the window; the fourth breaches
    // max_withdrawals = 3
    let now = Utc::now();
    for i in 0..4u32 {
        let ts = now - ChronoDuration::seconds(40 - i as i64 * 10);
        let payload = withdrawal(&wallet, "50.00", ts);
        assert_eq!(processor.handle(&payload, 0).await, Outcome::Ack);
    }

    let alerts = FraudAlertRepository::list_for_wallet(&h.pool, &wallet).await.unwrap();
    let rapid: Vec<_> = alerts
        .iter()
        .filter(|a| a.alert_type == "RAPID_WITHDRAWALS")
        .collect();
    assert_eq!(rapid.len(), 1);
    assert_eq!(rapid[0].details["withdrawalCount"], json!(4));
}

#[tokio::test]
async fn test_non_withdrawal_events_skip_rules() {
    let h = match harness().await {
        Some(h) => h,
        None => {
            eprintln!("Skipping test - database not available");
            return;
        }
    };
    let wallet = wallet_id("fraud");
    let processor = FraudProcessor::new(
        h.pool.clone(),
        h.cache.clone(),
        FraudConfig::default(),
    );

    let payload = serde_json::to_vec(&EventMessage {
        event_type: "TRANSFER_COMPLETED".to_string(),
        wallet_id: wallet.clone(),
        amount: Some(dec("50000")),
        metadata: json!({}),
        timestamp: Utc::now(),
    })
    .unwrap();

    assert_eq!(processor.handle(&payload, 0).await, Outcome::Ack);
    let alerts = FraudAlertRepository::list_for_wallet(&h.pool, &wallet).await.unwrap();
    assert!(alerts.is_empty());
}
