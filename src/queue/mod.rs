//! Processing-request transport
//!
//! The producer side publishes one request per source image right after a
//! record is created; the consumer side hands batches of raw deliveries to
//! the worker and acknowledges them once every request in the batch reached a
//! terminal state.

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaPublisher, KafkaRequestSource};
pub use memory::MemoryQueue;

use crate::models::ProcessingRequest;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A message as received from the transport, not yet parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn request(&self) -> Result<ProcessingRequest> {
        ProcessingRequest::from_payload(&self.payload)
    }
}

#[async_trait]
pub trait RequestPublisher: Send + Sync {
    async fn publish(&self, request: &ProcessingRequest) -> Result<()>;
}

#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Wait up to `wait` for the first delivery, then return whatever else is
    /// immediately available, up to `max` deliveries. An empty batch means the
    /// wait elapsed.
    async fn poll_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>>;

    /// Acknowledge every delivery in `deliveries`.
    async fn commit(&self, deliveries: &[Delivery]) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
