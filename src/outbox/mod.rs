//! Transactional outbox
//!
//! Event rows are written in the same store transaction as the business
//! mutation they describe, then drained to the event bus by the relay.
//! Delivery is at-least-once; consumers dedupe.

mod relay;

pub use relay::{OutboxRelay, RelayConfig};

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::bus::EventMessage;
use crate::wallet::model::WalletEventType;

/// Row staged for publication.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published: bool,
}

/// Event collected during a transaction, not yet assigned a row id.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub event_type: WalletEventType,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// Build an outbox event carrying the standard wire payload.
    pub fn from_message(event_type: WalletEventType, message: &EventMessage) -> Self {
        Self {
            aggregate_id: message.wallet_id.clone(),
            event_type,
            payload: serde_json::to_value(message).unwrap_or_else(|_| serde_json::json!({})),
        }
    }
}

pub struct OutboxRepository;

impl OutboxRepository {
    /// Insert a staged event within the caller's transaction.
    pub async fn insert(conn: &mut PgConnection, event: &NewOutboxEvent) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_id, event_type, payload, created_at, published)
            VALUES ($1, $2, $3, $4, clock_timestamp(), FALSE)
            "#,
        )
        .bind(id)
        .bind(&event.aggregate_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .execute(conn)
        .await?;

        Ok(id)
    }

    /// Oldest unpublished rows, up to `limit`.
    pub async fn fetch_unpublished(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, payload, created_at, published
            FROM outbox_events
            WHERE published = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OutboxEvent {
                id: row.get("id"),
                aggregate_id: row.get("aggregate_id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                created_at: row.get("created_at"),
                published: row.get("published"),
            })
            .collect())
    }

    /// Mark a batch published in one statement.
    pub async fn mark_published(pool: &PgPool, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE outbox_events SET published = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
