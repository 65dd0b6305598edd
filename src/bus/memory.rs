//! In-process event bus
//!
//! Records published messages in memory. Used by tests and by broker-less
//! runs (outbox rows are still written; nothing downstream consumes them).

use std::sync::Mutex;

use async_trait::async_trait;

use super::{BusError, EventPublisher};

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<PublishedMessage>>,
    fail_publishes: Mutex<bool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Drain recorded messages.
    pub fn take(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }

    /// Make subsequent publishes fail (for testing relay retry behavior).
    pub fn set_failing(&self, failing: bool) {
        *self.fail_publishes.lock().unwrap() = failing;
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError> {
        if *self.fail_publishes.lock().unwrap() {
            return Err(BusError("publish failed (injected)".to_string()));
        }
        self.messages.lock().unwrap().push(PublishedMessage {
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
