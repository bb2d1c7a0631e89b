//! Sink for requests the pipeline gave up on
//!
//! Abandoned requests are recorded with the stage and error that ended them,
//! so they can be inspected and replayed instead of silently dropped.

pub mod file;
pub mod kafka;
pub mod memory;

pub use file::JsonlDeadLetterSink;
pub use kafka::KafkaDeadLetterSink;
pub use memory::MemoryDeadLetterSink;

use crate::models::ProcessingRequest;
use crate::pipeline::Stage;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedRequest {
    pub id: Uuid,
    pub request: ProcessingRequest,
    pub stage: Stage,
    pub error: String,
    pub attempts: usize,
    pub abandoned_at: DateTime<Utc>,
}

impl AbandonedRequest {
    pub fn new(request: ProcessingRequest, stage: Stage, error: String, attempts: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            stage,
            error,
            attempts,
            abandoned_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, entry: &AbandonedRequest) -> Result<()>;
}
