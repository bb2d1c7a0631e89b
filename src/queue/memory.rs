use super::{Delivery, RequestPublisher, RequestSource};
use crate::models::ProcessingRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const MEMORY_TOPIC: &str = "memory";

/// Single-partition in-process queue implementing both transport sides.
#[derive(Clone)]
pub struct MemoryQueue {
    pending: Arc<Mutex<VecDeque<Delivery>>>,
    notify: Arc<Notify>,
    next_offset: Arc<Mutex<i64>>,
    published: Arc<Mutex<Vec<ProcessingRequest>>>,
    committed: Arc<Mutex<Vec<i64>>>,
    fail_publish: Arc<Mutex<bool>>,
    closed: Arc<Mutex<bool>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            next_offset: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
            committed: Arc::new(Mutex::new(Vec::new())),
            fail_publish: Arc::new(Mutex::new(false)),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_publish_failure(self, should_fail: bool) -> Self {
        *self.fail_publish.lock().unwrap() = should_fail;
        self
    }

    /// Enqueue an arbitrary payload, bypassing request serialization.
    pub fn push_raw(&self, key: Option<String>, payload: Vec<u8>) {
        let offset = {
            let mut next = self.next_offset.lock().unwrap();
            let offset = *next;
            *next += 1;
            offset
        };

        self.pending.lock().unwrap().push_back(Delivery {
            topic: MEMORY_TOPIC.to_string(),
            partition: 0,
            offset,
            key,
            payload,
        });
        self.notify.notify_one();
    }

    pub fn get_published(&self) -> Vec<ProcessingRequest> {
        self.published.lock().unwrap().clone()
    }

    pub fn get_committed(&self) -> Vec<i64> {
        self.committed.lock().unwrap().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestPublisher for MemoryQueue {
    async fn publish(&self, request: &ProcessingRequest) -> Result<()> {
        if *self.fail_publish.lock().unwrap() {
            return Err(Error::Publish("Mock publish failure".to_string()));
        }

        self.published.lock().unwrap().push(request.clone());
        self.push_raw(Some(request.message_key()), request.to_payload()?);
        Ok(())
    }
}

#[async_trait]
impl RequestSource for MemoryQueue {
    async fn poll_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut pending = self.pending.lock().unwrap();
                if !pending.is_empty() {
                    let count = pending.len().min(max);
                    return Ok(pending.drain(..count).collect());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn commit(&self, deliveries: &[Delivery]) -> Result<()> {
        self.committed
            .lock()
            .unwrap()
            .extend(deliveries.iter().map(|delivery| delivery.offset));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
