use super::{Delivery, RequestPublisher, RequestSource};
use crate::config::KafkaConfig;
use crate::models::ProcessingRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_WAIT: Duration = Duration::from_millis(10);

/// Publishes processing requests keyed by product id, so every request for a
/// product lands on the same partition.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create::<FutureProducer>()
            .map_err(|e| Error::Config(format!("Failed to create Kafka producer: {}", e)))?;

        info!(brokers = %brokers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    /// Same producer connection, different destination topic.
    pub fn for_topic(&self, topic: &str) -> Self {
        Self {
            producer: self.producer.clone(),
            topic: topic.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| Error::Publish(format!("Kafka send to {} failed: {}", self.topic, e)))
    }
}

#[async_trait]
impl RequestPublisher for KafkaPublisher {
    async fn publish(&self, request: &ProcessingRequest) -> Result<()> {
        let payload = request.to_payload()?;
        self.send(&request.message_key(), &payload).await?;

        debug!(
            product_id = request.product_id,
            image_url = %request.image_url,
            topic = %self.topic,
            "Published processing request"
        );
        Ok(())
    }
}

/// Consumer-group member reading processing requests.
///
/// Offsets are committed explicitly after a batch completes, so a crash
/// mid-batch redelivers it. Batch commits are asynchronous; `close` commits
/// the furthest offsets seen so far synchronously before leaving the group.
pub struct KafkaRequestSource {
    consumer: StreamConsumer,
    committed: Mutex<BTreeMap<(String, i32), i64>>,
}

impl KafkaRequestSource {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval.as_millis().to_string(),
            )
            .create()
            .map_err(|e| Error::Config(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| Error::Consume(format!("Failed to subscribe to topic: {}", e)))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            max_poll_interval_ms = config.max_poll_interval.as_millis() as u64,
            "Kafka consumer initialized"
        );

        Ok(Self {
            consumer,
            committed: Mutex::new(BTreeMap::new()),
        })
    }

    fn to_delivery(message: &BorrowedMessage<'_>) -> Delivery {
        Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RequestSource for KafkaRequestSource {
    async fn poll_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let mut batch = Vec::new();
        let mut window = wait;

        while batch.len() < max {
            match tokio::time::timeout(window, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => batch.push(Self::to_delivery(&message)),
                Ok(Err(e)) if batch.is_empty() => {
                    return Err(Error::Consume(format!("Kafka receive failed: {}", e)))
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Kafka receive failed mid-batch; returning partial batch");
                    break;
                }
            }
            window = DRAIN_WAIT;
        }

        Ok(batch)
    }

    async fn commit(&self, deliveries: &[Delivery]) -> Result<()> {
        if deliveries.is_empty() {
            return Ok(());
        }

        let next_offsets = commit_offsets(deliveries);
        let offsets = partition_list(&next_offsets)?;
        merge_offsets(
            &mut self.committed.lock().unwrap_or_else(|e| e.into_inner()),
            next_offsets,
        );

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| Error::Consume(format!("Offset commit failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        let committed =
            std::mem::take(&mut *self.committed.lock().unwrap_or_else(|e| e.into_inner()));
        if !committed.is_empty() {
            let offsets = partition_list(&committed)?;
            match self.consumer.commit(&offsets, CommitMode::Sync) {
                Ok(()) => info!(partitions = committed.len(), "Final offsets committed"),
                Err(e) => warn!(error = %e, "Final offset commit failed"),
            }
        }

        self.consumer.unsubscribe();
        info!("Kafka consumer unsubscribed");
        Ok(())
    }
}

/// Next offset to consume per partition: one past the highest delivered.
fn commit_offsets(deliveries: &[Delivery]) -> BTreeMap<(String, i32), i64> {
    let mut next_offsets = BTreeMap::new();
    for delivery in deliveries {
        let next = next_offsets
            .entry((delivery.topic.clone(), delivery.partition))
            .or_insert(delivery.offset + 1);
        *next = (*next).max(delivery.offset + 1);
    }
    next_offsets
}

fn merge_offsets(
    committed: &mut BTreeMap<(String, i32), i64>,
    next_offsets: BTreeMap<(String, i32), i64>,
) {
    for (partition, offset) in next_offsets {
        let current = committed.entry(partition).or_insert(offset);
        *current = (*current).max(offset);
    }
}

fn partition_list(offsets: &BTreeMap<(String, i32), i64>) -> Result<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    for ((topic, partition), offset) in offsets {
        list.add_partition_offset(topic, *partition, Offset::Offset(*offset))
            .map_err(|e| Error::Consume(format!("Invalid commit offset: {}", e)))?;
    }
    Ok(list)
}
