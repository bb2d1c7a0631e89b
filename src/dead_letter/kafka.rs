use super::{AbandonedRequest, DeadLetterSink};
use crate::queue::KafkaPublisher;
use crate::Result;
use async_trait::async_trait;

/// Publishes abandoned requests to a secondary topic, keyed by product id.
pub struct KafkaDeadLetterSink {
    publisher: KafkaPublisher,
}

impl KafkaDeadLetterSink {
    pub fn new(publisher: KafkaPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn record(&self, entry: &AbandonedRequest) -> Result<()> {
        let payload = serde_json::to_vec(entry)?;
        self.publisher
            .send(&entry.request.message_key(), &payload)
            .await?;

        tracing::info!(
            product_id = entry.request.product_id,
            topic = %self.publisher.topic(),
            "Recorded abandoned request"
        );
        Ok(())
    }
}
