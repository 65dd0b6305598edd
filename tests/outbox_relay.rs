//! Outbox relay: drain order, publish failure handling, at-least-once
//! semantics. Skip when no database is reachable.
//!
//! The relay drains the whole table, so these tests serialize on a static
//! lock and retire rows left over from other flows before asserting.

mod common;

use common::{dec, harness, wallet_id};
use tokio::sync::Mutex;
use walletd::outbox::{OutboxRelay, RelayConfig};

static RELAY_TESTS: Mutex<()> = Mutex::const_new(());

macro_rules! require_db {
    () => {
        match harness().await {
            Some(h) => h,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        }
    };
}

/// Mark every pre-existing row published so only this test's rows remain.
async fn retire_existing_rows(pool: &sqlx::PgPool) {
    sqlx::query("UPDATE outbox_events SET published = TRUE")
        .execute(pool)
        .await
        .unwrap();
}

/// Let spawned post-commit publishes finish before inspecting the bus.
async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

async fn unpublished_count(pool: &sqlx::PgPool, aggregate: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1 AND published = FALSE",
    )
    .bind(aggregate)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_relay_publishes_and_marks_rows() {
    let _guard = RELAY_TESTS.lock().await;
    let h = require_db!();
    retire_existing_rows(&h.pool).await;
    let alice = wallet_id("alice");

    h.engine.deposit(&alice, dec("100"), None).await.unwrap();
    h.engine.withdraw(&alice, dec("25"), None).await.unwrap();
    assert_eq!(unpublished_count(&h.pool, &alice).await, 3);

    // drop whatever the post-commit fast path already pushed
    settle().await;
    h.bus.take();

    let relay = OutboxRelay::new(h.pool.clone(), h.bus.clone(), RelayConfig::default());
    let published = relay.tick().await.unwrap();
    assert_eq!(published, 3);

    assert_eq!(unpublished_count(&h.pool, &alice).await, 0);

    let messages = h.bus.take();
    let keys: Vec<&str> = messages.iter().map(|m| m.routing_key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "wallet.wallet_created",
            "wallet.funds_deposited",
            "wallet.funds_withdrawn"
        ],
        "rows drain in insertion order"
    );
}

#[tokio::test]
async fn test_relay_retries_after_publish_failure() {
    let _guard = RELAY_TESTS.lock().await;
    let h = require_db!();
    retire_existing_rows(&h.pool).await;
    let alice = wallet_id("alice");

    h.engine.deposit(&alice, dec("10"), None).await.unwrap();
    settle().await;
    h.bus.take();

    let relay = OutboxRelay::new(h.pool.clone(), h.bus.clone(), RelayConfig::default());

    // broker down: nothing published, rows stay for the next tick
    h.bus.set_failing(true);
    relay.tick().await.unwrap();
    assert_eq!(unpublished_count(&h.pool, &alice).await, 2);

    // broker back: the same rows drain
    h.bus.set_failing(false);
    relay.tick().await.unwrap();
    assert_eq!(unpublished_count(&h.pool, &alice).await, 0);
}

#[tokio::test]
async fn test_relay_payload_carries_wire_format() {
    let _guard = RELAY_TESTS.lock().await;
    let h = require_db!();
    retire_existing_rows(&h.pool).await;
    let alice = wallet_id("alice");

    h.engine.deposit(&alice, dec("42"), None).await.unwrap();
    settle().await;
    h.bus.take();

    let relay = OutboxRelay::new(h.pool.clone(), h.bus.clone(), RelayConfig::default());
    relay.tick().await.unwrap();

    let deposit = h
        .bus
        .take()
        .into_iter()
        .find(|m| m.routing_key == "wallet.funds_deposited")
        .expect("deposit event published");

    let payload: serde_json::Value = serde_json::from_slice(&deposit.payload).unwrap();
    assert_eq!(payload["eventType"], "FUNDS_DEPOSITED");
    assert_eq!(payload["walletId"], alice.as_str());
    assert!(payload["amount"].is_string() || payload["amount"].is_number());
    assert!(payload.get("timestamp").is_some());
}
