//! Fraud consumer: broker topology and delivery loop
//!
//! Prefetch 1 for cooperative load balancing across worker replicas. Retries
//! go through TTL wait queues that dead-letter back into the main exchange
//! under a dedicated retry routing key; exhausted or unparseable messages
//! land in the DLQ.

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::processor::{FraudProcessor, Outcome};
use crate::bus::{AmqpBus, BusError};

/// Header carrying the delivery attempt count.
const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Routing key wait queues dead-letter back under; bound to the main queue.
const RETRY_ROUTING_KEY: &str = "wallet.retry";

/// Routing keys the consumer subscribes to.
const BINDINGS: [&str; 2] = ["wallet.funds_withdrawn", "wallet.transfer_completed"];

/// Queue and exchange names derived from the configured base names.
#[derive(Debug, Clone)]
pub struct FraudTopology {
    pub exchange: String,
    pub queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub retry_delays_ms: Vec<u64>,
}

impl FraudTopology {
    pub fn new(exchange: &str, queue: &str, retry_delays_ms: Vec<u64>) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            dead_letter_exchange: format!("{}.dlx", exchange),
            dead_letter_queue: format!("{}.dlq", queue),
            retry_delays_ms,
        }
    }

    pub fn wait_queue(&self, delay_ms: u64) -> String {
        format!("{}.wait.{}", self.queue, delay_ms)
    }

    /// Wait queue for a given attempt; later attempts reuse the longest
    /// delay.
    pub fn wait_queue_for_attempt(&self, attempt: u32) -> String {
        let idx = (attempt as usize).min(self.retry_delays_ms.len() - 1);
        self.wait_queue(self.retry_delays_ms[idx])
    }

    /// Declare exchanges, queues, and bindings. Idempotent; runs on every
    /// connect.
    pub async fn install(&self, channel: &Channel) -> Result<(), BusError> {
        let durable = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                durable,
                FieldTable::default(),
            )
            .await
            .map_err(map_err)?;

        channel
            .exchange_declare(
                &self.dead_letter_exchange,
                ExchangeKind::Topic,
                durable,
                FieldTable::default(),
            )
            .await
            .map_err(map_err)?;

        // Main queue dead-letters rejected messages to the DLX.
        let mut main_args = FieldTable::default();
        main_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(self.dead_letter_exchange.as_str().into()),
        );
        channel
            .queue_declare(&self.queue, durable_queue, main_args)
            .await
            .map_err(map_err)?;

        for key in BINDINGS.iter().chain([RETRY_ROUTING_KEY].iter()) {
            channel
                .queue_bind(
                    &self.queue,
                    &self.exchange,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(map_err)?;
        }

        channel
            .queue_declare(&self.dead_letter_queue, durable_queue, FieldTable::default())
            .await
            .map_err(map_err)?;
        channel
            .queue_bind(
                &self.dead_letter_queue,
                &self.dead_letter_exchange,
                "#",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_err)?;

        // Wait queues: messages expire after the queue TTL and dead-letter
        // back into the main exchange under the retry routing key.
        for delay_ms in &self.retry_delays_ms {
            let mut args = FieldTable::default();
            args.insert(
                ShortString::from("x-message-ttl"),
                AMQPValue::LongInt(*delay_ms as i32),
            );
            args.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(self.exchange.as_str().into()),
            );
            args.insert(
                ShortString::from("x-dead-letter-routing-key"),
                AMQPValue::LongString(RETRY_ROUTING_KEY.into()),
            );
            channel
                .queue_declare(&self.wait_queue(*delay_ms), durable_queue, args)
                .await
                .map_err(map_err)?;
        }

        info!(
            exchange = %self.exchange,
            queue = %self.queue,
            "Fraud consumer topology installed"
        );
        Ok(())
    }
}

fn map_err(e: lapin::Error) -> BusError {
    BusError(e.to_string())
}

pub struct FraudConsumer {
    bus: Arc<AmqpBus>,
    processor: Arc<FraudProcessor>,
    topology: FraudTopology,
}

impl FraudConsumer {
    pub fn new(bus: Arc<AmqpBus>, processor: Arc<FraudProcessor>, topology: FraudTopology) -> Self {
        Self {
            bus,
            processor,
            topology,
        }
    }

    /// Consume until shutdown. Reconnects (with a fixed pause) when the
    /// delivery stream drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.consume(&mut shutdown).await {
                Ok(()) => return,
                Err(e) => {
                    error!(error = %e, "Fraud consumer disconnected; reconnecting in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }

    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), BusError> {
        let channel = self.bus.create_channel().await?;
        self.topology.install(&channel).await?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(map_err)?;

        let mut consumer = channel
            .basic_consume(
                &self.topology.queue,
                "fraud-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_err)?;

        info!(queue = %self.topology.queue, "Fraud consumer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Fraud consumer shutting down");
                    return Ok(());
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            if let Err(e) = self.handle_delivery(&channel, delivery).await {
                                warn!(error = %e, "Delivery handling failed");
                            }
                        }
                        Some(Err(e)) => return Err(map_err(e)),
                        None => return Err(BusError("delivery stream closed".to_string())),
                    }
                }
            }
        }
    }

    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) -> Result<(), BusError> {
        let retry_count = read_retry_count(&delivery);

        match self.processor.handle(&delivery.data, retry_count).await {
            Outcome::Ack => delivery.ack(BasicAckOptions::default()).await.map_err(map_err),
            Outcome::DeadLetter => delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
                .map_err(map_err),
            Outcome::Retry { attempt } => {
                // Republish the original payload to the wait queue with the
                // incremented attempt count, then ack the original.
                let wait_queue = self.topology.wait_queue_for_attempt(attempt);

                let mut headers = FieldTable::default();
                headers.insert(
                    ShortString::from(RETRY_COUNT_HEADER),
                    AMQPValue::LongInt((attempt + 1) as i32),
                );

                channel
                    .basic_publish(
                        "",
                        &wait_queue,
                        BasicPublishOptions::default(),
                        &delivery.data,
                        BasicProperties::default()
                            .with_delivery_mode(crate::bus::DELIVERY_MODE_PERSISTENT)
                            .with_headers(headers),
                    )
                    .await
                    .map_err(map_err)?
                    .await
                    .map_err(map_err)?;

                delivery.ack(BasicAckOptions::default()).await.map_err(map_err)
            }
        }
    }
}

fn read_retry_count(delivery: &Delivery) -> u32 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(|value| match value {
            AMQPValue::LongInt(i) => Some(*i as u32),
            AMQPValue::LongLongInt(i) => Some(*i as u32),
            AMQPValue::ShortInt(i) => Some(*i as u32),
            AMQPValue::ShortShortInt(i) => Some(*i as u32),
            _ => None,
        })
        .unwrap_or(0)
}
