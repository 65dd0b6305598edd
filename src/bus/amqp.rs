//! AMQP event bus

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use super::{BusError, EventPublisher};

/// Persistent delivery mode (survives broker restart).
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

pub struct AmqpBus {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpBus {
    /// Connect, open a publish channel with confirms, and declare the topic
    /// exchange.
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, BusError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError(e.to_string()))?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError(e.to_string()))?;

        tracing::info!(exchange = %exchange, "AMQP connection established");

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Open an extra channel on the shared connection (used by consumers).
    pub async fn create_channel(&self) -> Result<Channel, BusError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| BusError(e.to_string()))
    }

    /// Close channel and connection, draining in-flight confirms first.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(0, "shutdown").await {
            tracing::warn!(error = %e, "AMQP channel close failed");
        }
        if let Err(e) = self.connection.close(0, "shutdown").await {
            tracing::warn!(error = %e, "AMQP connection close failed");
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpBus {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError> {
        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BusError(e.to_string()))?;

        // Publisher confirm: a timeout here leaves the row in the outbox
        // for the relay to retry.
        confirm.await.map_err(|e| BusError(e.to_string()))?;
        Ok(())
    }
}
