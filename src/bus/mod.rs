//! Event bus
//!
//! At-least-once publishing behind the [`EventPublisher`] port. The wire
//! format is a topic exchange with routing keys `wallet.<event_type>` and a
//! JSON body; see [`EventMessage`]. Consumers must dedupe — delivery is
//! at-least-once and possibly out of order.

mod amqp;
mod memory;

pub use amqp::{AmqpBus, DELIVERY_MODE_PERSISTENT};
pub use memory::{MemoryBus, PublishedMessage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("event bus error: {0}")]
pub struct BusError(pub String);

/// Message body published for every wallet event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_type: String,
    pub wallet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Routing key for an event type: `wallet.<event_type_lowercase>`.
pub fn routing_key(event_type: &str) -> String {
    format!("wallet.{}", event_type.to_lowercase())
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a payload with the given routing key. Implementations must
    /// confirm durable delivery before returning `Ok`.
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError>;
}
